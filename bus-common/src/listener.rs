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

//! Typed listeners and the adapters that feed them from a transport consumer.

use crate::context::ConsumerConnectionContext;
use crate::message::BasicMessage;
use crate::observability::{events, fields};
use crate::processor::MessageProcessor;
use crate::serializer::{Decodable, MessageSerializer};
use crate::transport::{WireListener, WireMessage};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

const COMPONENT: &str = "listener";

/// Receives decoded messages from a consumer.
#[async_trait]
pub trait BasicMessageListener: Send + Sync + 'static {
    /// What deliveries are decoded into. Use `Box<dyn BasicMessage>` to accept
    /// any registered type.
    type Message: Decodable;

    async fn on_basic_message(&self, message: Self::Message);

    /// Called with the consumer's context right before the listener starts
    /// receiving. A listener that wants to stop itself keeps this and closes it.
    fn on_attach(&self, _context: &ConsumerConnectionContext) {}
}

/// Decodes each delivery and hands it to a [`BasicMessageListener`].
///
/// Deliveries that fail to decode are logged and dropped.
pub struct DecodingListener<L> {
    listener: Arc<L>,
    serializer: Arc<MessageSerializer>,
}

impl<L: BasicMessageListener> DecodingListener<L> {
    pub fn new(listener: Arc<L>, serializer: Arc<MessageSerializer>) -> Self {
        Self {
            listener,
            serializer,
        }
    }

    pub fn listener(&self) -> &Arc<L> {
        &self.listener
    }
}

#[async_trait]
impl<L: BasicMessageListener> WireListener for DecodingListener<L> {
    async fn on_message(&self, message: WireMessage) {
        let message_id = message.message_id.clone();
        match L::Message::decode_from(&self.serializer, message) {
            Ok(decoded) => self.listener.on_basic_message(decoded).await,
            Err(err) => {
                warn!(
                    event = events::LISTENER_DECODE_FAILED,
                    component = COMPONENT,
                    msg_id = %fields::format_optional_id(message_id.as_ref()),
                    err = %err,
                    "unable to decode delivered message; skipping it"
                );
            }
        }
    }
}

/// Server side of a request/response exchange.
#[async_trait]
pub trait RpcMessageHandler: Send + Sync + 'static {
    type Request: Decodable;
    type Response: BasicMessage;

    /// Returns the reply to send back, or `None` to stay silent.
    async fn on_request(&self, request: Self::Request) -> Option<Self::Response>;
}

/// Listener that answers each request on the destination named by its reply-to.
///
/// The reply is sent through a producer created on the session of the consumer
/// the listener was most recently attached to, and closed right after. Unless
/// the handler set one, the reply's correlation id is the request's message id.
pub struct RpcListener<H> {
    handler: H,
    processor: MessageProcessor,
    context: RwLock<Option<ConsumerConnectionContext>>,
}

impl<H: RpcMessageHandler> RpcListener<H> {
    pub fn new(handler: H) -> Self {
        Self::with_processor(handler, MessageProcessor::new())
    }

    pub fn with_processor(handler: H, processor: MessageProcessor) -> Self {
        Self {
            handler,
            processor,
            context: RwLock::new(None),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    fn current_context(&self) -> Option<ConsumerConnectionContext> {
        self.context
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl<H: RpcMessageHandler> BasicMessageListener for RpcListener<H> {
    type Message = H::Request;

    async fn on_basic_message(&self, request: H::Request) {
        let reply_to = request.decoded_base().reply_to().cloned();
        let request_id = request.decoded_base().message_id().cloned();

        let Some(mut response) = self.handler.on_request(request).await else {
            debug!(
                event = events::RPC_REPLY_SKIPPED,
                component = COMPONENT,
                msg_id = %fields::format_optional_id(request_id.as_ref()),
                reason = fields::REASON_NO_RESPONSE,
                "handler produced no response"
            );
            return;
        };

        let Some(reply_to) = reply_to else {
            debug!(
                event = events::RPC_REPLY_SKIPPED,
                component = COMPONENT,
                msg_id = %fields::format_optional_id(request_id.as_ref()),
                reason = fields::REASON_NO_REPLY_TO,
                "sender did not ask for a reply"
            );
            return;
        };

        let Some(context) = self.current_context() else {
            warn!(
                event = events::RPC_REPLY_FAILED,
                component = COMPONENT,
                msg_id = %fields::format_optional_id(request_id.as_ref()),
                reason = fields::REASON_NO_CONTEXT,
                "listener was never attached to a consumer; cannot reply"
            );
            return;
        };

        if response.correlation_id().is_none() {
            response.set_correlation_id(request_id.clone());
        }

        let producer = match context.context().create_producer_for(&reply_to).await {
            Ok(producer) => producer,
            Err(err) => {
                warn!(
                    event = events::RPC_REPLY_FAILED,
                    component = COMPONENT,
                    reply_to = %reply_to,
                    err = %err,
                    "unable to create reply producer"
                );
                return;
            }
        };

        match self.processor.send(&producer, &mut response, None).await {
            Ok(reply_id) => debug!(
                event = events::RPC_REPLY_SENT,
                component = COMPONENT,
                reply_to = %reply_to,
                msg_id = %reply_id,
                "reply sent"
            ),
            Err(err) => warn!(
                event = events::RPC_REPLY_FAILED,
                component = COMPONENT,
                reply_to = %reply_to,
                err = %err,
                "unable to send reply"
            ),
        }

        if let Err(err) = producer.close().await {
            debug!(
                event = events::CONTEXT_CLOSE_FAILED,
                component = COMPONENT,
                reply_to = %reply_to,
                err = %err,
                "unable to close reply producer"
            );
        }
    }

    fn on_attach(&self, context: &ConsumerConnectionContext) {
        let previous = self
            .context
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(context.clone());
        if let Some(previous) = previous {
            debug!(
                event = events::LISTENER_ATTACH,
                component = COMPONENT,
                destination = %context.destination(),
                previous = %previous.destination(),
                "rpc listener re-attached; replies now go through the new consumer"
            );
        }
    }
}
