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

use bus_common::{BasicMessage, Endpoint, Message, SimpleBasicMessage};
use embedded_broker::EmbeddedBroker;
use std::collections::HashMap;
use support::{collector, make_bus, next_within, TextMessage, DELIVERY_TIMEOUT, SILENCE};

fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_listener_only_sees_matching_headers() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);
    let queue = Endpoint::queue("selector.queue");

    let (listener, mut received) = collector::<Box<dyn BasicMessage>>();
    let registration = bus
        .register(&queue, listener, Some("x = '1'"))
        .await
        .expect("register");

    bus.send(&queue, &mut TextMessage::new("skipped"), Some(&headers(&[("x", "2")])))
        .await
        .expect("send x=2");
    bus.send(&queue, &mut TextMessage::new("wanted"), Some(&headers(&[("x", "1")])))
        .await
        .expect("send x=1");

    let delivered = next_within(&mut received, DELIVERY_TIMEOUT)
        .await
        .expect("matching message delivered");
    assert_eq!(delivered.message_type(), TextMessage::MESSAGE_TYPE);
    assert_eq!(delivered.headers().get("x").map(String::as_str), Some("1"));
    let text = delivered
        .downcast::<TextMessage>()
        .expect("registered type decodes to itself");
    assert_eq!(text.text, "wanted");

    assert!(next_within(&mut received, SILENCE).await.is_none());
    assert_eq!(broker.queue_depth("selector.queue"), 1);

    registration.cancel().await;
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn topic_listeners_filter_independently() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);
    let topic = Endpoint::topic("selector.topic");

    let (everything, mut all_rx) = collector::<SimpleBasicMessage>();
    let (high_only, mut high_rx) = collector::<SimpleBasicMessage>();
    bus.register(&topic, everything, None)
        .await
        .expect("register unfiltered");
    bus.register(&topic, high_only, Some("level IN ('high', 'critical')"))
        .await
        .expect("register filtered");
    assert_eq!(broker.topic_subscribers("selector.topic"), 2);

    for level in ["low", "critical"] {
        bus.send(
            &topic,
            &mut SimpleBasicMessage::new(level),
            Some(&headers(&[("level", level)])),
        )
        .await
        .expect("publish");
    }

    let first = next_within(&mut all_rx, DELIVERY_TIMEOUT).await.expect("low");
    let second = next_within(&mut all_rx, DELIVERY_TIMEOUT)
        .await
        .expect("critical");
    assert_eq!(first.message(), "low");
    assert_eq!(second.message(), "critical");

    let filtered = next_within(&mut high_rx, DELIVERY_TIMEOUT)
        .await
        .expect("critical passes the filter");
    assert_eq!(filtered.message(), "critical");
    assert!(next_within(&mut high_rx, SILENCE).await.is_none());

    bus.shutdown().await;
    assert_eq!(broker.topic_subscribers("selector.topic"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn polling_receive_honours_the_selector() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);
    let queue = Endpoint::queue("selector.poll");

    bus.send(&queue, &mut TextMessage::new("first"), Some(&headers(&[("tenant", "a")])))
        .await
        .expect("send a");
    bus.send(&queue, &mut TextMessage::new("second"), Some(&headers(&[("tenant", "b")])))
        .await
        .expect("send b");

    let picked = bus
        .receive_timeout::<TextMessage>(&queue, Some("tenant = 'b'"), DELIVERY_TIMEOUT)
        .await
        .expect("receive")
        .expect("tenant b is queued");
    assert_eq!(picked.text, "second");
    assert_eq!(broker.queue_depth("selector.poll"), 1);

    bus.shutdown().await;
}
