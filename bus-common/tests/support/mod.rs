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

#![allow(dead_code)]

use async_trait::async_trait;
use bus_common::{
    BasicMessageListener, Bus, BusConfig, Decodable, Message, MessageBase, MessageSerializer,
};
use embedded_broker::EmbeddedBroker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub(crate) const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const SILENCE: Duration = Duration::from_millis(150);

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct TextMessage {
    #[serde(skip)]
    base: MessageBase,
    pub(crate) text: String,
}

impl TextMessage {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            base: MessageBase::default(),
            text: text.to_string(),
        }
    }
}

impl Message for TextMessage {
    const MESSAGE_TYPE: &'static str = "org.hawkular.bus.common.test.TextMessage";

    fn message_base(&self) -> &MessageBase {
        &self.base
    }

    fn message_base_mut(&mut self) -> &mut MessageBase {
        &mut self.base
    }
}

pub(crate) fn serializer() -> MessageSerializer {
    let mut serializer = MessageSerializer::new();
    serializer.register::<TextMessage>();
    serializer
}

pub(crate) fn make_bus(broker: &EmbeddedBroker) -> Bus {
    Bus::with_serializer(Arc::new(broker.clone()), BusConfig::default(), serializer())
}

/// Forwards every decoded delivery into a channel.
pub(crate) struct Collector<T> {
    tx: mpsc::UnboundedSender<T>,
}

pub(crate) fn collector<T: Decodable>() -> (Arc<Collector<T>>, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Collector { tx }), rx)
}

#[async_trait]
impl<T: Decodable> BasicMessageListener for Collector<T> {
    type Message = T;

    async fn on_basic_message(&self, message: T) {
        let _ = self.tx.send(message);
    }
}

pub(crate) async fn next_within<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    within: Duration,
) -> Option<T> {
    tokio::time::timeout(within, rx.recv()).await.ok().flatten()
}
