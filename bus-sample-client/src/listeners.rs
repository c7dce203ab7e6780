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

use async_trait::async_trait;
use bus_common::{BasicMessage, BasicMessageListener, RpcMessageHandler, SimpleBasicMessage};
use tokio::sync::mpsc;
use tracing::info;

/// Logs every greeting and reports it to the main task.
pub(crate) struct GreetingPrinter {
    pub(crate) seen: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl BasicMessageListener for GreetingPrinter {
    type Message = SimpleBasicMessage;

    async fn on_basic_message(&self, message: SimpleBasicMessage) {
        info!(
            msg_id = ?message.message_id().map(|id| id.as_str()),
            text = message.message(),
            "greeting received"
        );
        let _ = self.seen.send(message.message().to_string());
    }
}

/// Answers each request with its text upper-cased.
pub(crate) struct Shouter;

#[async_trait]
impl RpcMessageHandler for Shouter {
    type Request = SimpleBasicMessage;
    type Response = SimpleBasicMessage;

    async fn on_request(&self, request: SimpleBasicMessage) -> Option<SimpleBasicMessage> {
        Some(SimpleBasicMessage::new(request.message().to_uppercase()))
    }
}
