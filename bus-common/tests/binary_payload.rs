/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

mod support;

use bus_common::{
    BinaryData, ConnectionContextFactory, Endpoint, Message, MessageProcessor,
    MessageWithExtraData,
};
use embedded_broker::EmbeddedBroker;
use std::fs::File;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use support::{make_bus, TextMessage, DELIVERY_TIMEOUT};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn read_all(binary_data: &mut BinaryData) -> Vec<u8> {
    let mut bytes = Vec::new();
    binary_data.read_to_end(&mut bytes).expect("read binary data");
    bytes
}

#[tokio::test(flavor = "multi_thread")]
async fn binary_data_follows_the_message() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);
    let queue = Endpoint::queue("binary.upload");
    let bytes = payload(64 * 1024);

    let closed = Arc::new(AtomicBool::new(false));
    let attachment = BinaryData::from_bytes(bytes.clone()).with_on_close({
        let closed = closed.clone();
        move || closed.store(true, Ordering::SeqCst)
    });
    bus.send_with_binary_data(&queue, &mut TextMessage::new("report.bin"), attachment, None)
        .await
        .expect("send with binary data");
    assert!(closed.load(Ordering::SeqCst), "sent stream is closed after transfer");

    let mut received = bus
        .receive_timeout::<TextMessage>(&queue, None, DELIVERY_TIMEOUT)
        .await
        .expect("receive")
        .expect("message queued");
    assert_eq!(received.text, "report.bin");

    let mut binary_data = received
        .message_base_mut()
        .take_binary_data()
        .expect("binary data attached");
    assert_eq!(read_all(&mut binary_data), bytes);

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn partially_read_binary_data_can_be_forwarded() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);
    let inbound = Endpoint::queue("binary.inbound");
    let outbound = Endpoint::queue("binary.outbound");
    let bytes = payload(4096);

    bus.send_with_binary_data(
        &inbound,
        &mut TextMessage::new("relay"),
        BinaryData::from_bytes(bytes.clone()),
        None,
    )
    .await
    .expect("send");

    let mut message = bus
        .receive_timeout::<TextMessage>(&inbound, None, DELIVERY_TIMEOUT)
        .await
        .expect("receive")
        .expect("message queued");
    let mut binary_data = message
        .message_base_mut()
        .take_binary_data()
        .expect("binary data attached");
    assert_eq!(binary_data.read_byte().expect("read"), Some(bytes[0]));
    assert_eq!(binary_data.skip(9).expect("skip"), 9);

    let contexts = ConnectionContextFactory::shared(Arc::new(broker.clone()));
    let producer = contexts
        .create_producer_context(&outbound)
        .await
        .expect("producer context");
    MessageProcessor::new()
        .send_message_with_extra_data(
            &producer,
            MessageWithExtraData::new(message, Some(binary_data)),
            None,
        )
        .await
        .expect("forward");
    contexts.close().await;

    let mut forwarded = bus
        .receive_timeout::<TextMessage>(&outbound, None, DELIVERY_TIMEOUT)
        .await
        .expect("receive")
        .expect("forwarded message queued");
    assert_eq!(forwarded.text, "relay");
    let mut rest = forwarded
        .message_base_mut()
        .take_binary_data()
        .expect("binary data attached");
    assert_eq!(read_all(&mut rest), bytes[10..].to_vec());

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn file_contents_can_be_sent_as_binary_data() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);
    let queue = Endpoint::queue("binary.file");
    let bytes = payload(10_000);

    let path = std::env::temp_dir().join(format!("bus-common-{}.bin", uuid::Uuid::new_v4()));
    File::create(&path)
        .and_then(|mut file| file.write_all(&bytes))
        .expect("write attachment file");

    let attachment = BinaryData::from_stream(File::open(&path).expect("open attachment file"));
    let sent = bus
        .send_with_binary_data(&queue, &mut TextMessage::new("upload.bin"), attachment, None)
        .await;
    std::fs::remove_file(&path).expect("remove attachment file");
    sent.expect("send file");

    let mut received = bus
        .receive_timeout::<TextMessage>(&queue, None, DELIVERY_TIMEOUT)
        .await
        .expect("receive")
        .expect("message queued");
    assert_eq!(received.text, "upload.bin");
    let mut binary_data = received
        .message_base_mut()
        .take_binary_data()
        .expect("binary data attached");
    assert_eq!(read_all(&mut binary_data), bytes);

    bus.shutdown().await;
}
