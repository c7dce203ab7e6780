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

//! Sending messages through producer contexts and attaching listeners to
//! consumer contexts.

use crate::binary_data::BinaryData;
use crate::context::{ConsumerConnectionContext, ProducerConnectionContext, RpcConnectionContext};
use crate::error::{BusError, Result};
use crate::listener::{BasicMessageListener, DecodingListener};
use crate::message::{BasicMessage, Message, MessageWithExtraData};
use crate::message_id::MessageId;
use crate::observability::{events, fields};
use crate::serializer::{Decodable, MessageSerializer};
use crate::transport::{WireListener, WireMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const COMPONENT: &str = "message_processor";

/// Encodes messages onto producers and decodes deliveries for listeners.
///
/// Cloning is cheap; clones share one [`MessageSerializer`].
#[derive(Clone, Default)]
pub struct MessageProcessor {
    serializer: Arc<MessageSerializer>,
}

impl MessageProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serializer(serializer: Arc<MessageSerializer>) -> Self {
        Self { serializer }
    }

    pub fn serializer(&self) -> &Arc<MessageSerializer> {
        &self.serializer
    }

    /// Sends `message` to the context's destination and returns the id the
    /// transport assigned.
    ///
    /// Any id already on the message is discarded; the new one is written back
    /// to the message. Headers in `headers` override the message's own headers.
    pub async fn send<M: BasicMessage + ?Sized>(
        &self,
        context: &ProducerConnectionContext,
        message: &mut M,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<MessageId> {
        context.context().ensure_open()?;

        if let Some(stale) = message.message_id() {
            debug!(
                event = events::SEND_DISCARD_MESSAGE_ID,
                component = COMPONENT,
                msg_id = %stale,
                "message already carries an id; a new one will be assigned"
            );
            message.set_message_id(None);
        }

        let wire = self.serializer.encode(message, headers)?;
        self.transmit(context, message, wire).await
    }

    /// Sends `message` followed by the bytes of `binary_data`.
    ///
    /// Fails with [`BusError::InvalidArgument`] when no binary data is given.
    pub async fn send_with_binary_data<M: BasicMessage + ?Sized>(
        &self,
        context: &ProducerConnectionContext,
        message: &mut M,
        binary_data: Option<BinaryData>,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<MessageId> {
        let binary_data = binary_data.ok_or_else(|| {
            BusError::InvalidArgument("binary data must be provided".to_string())
        })?;
        message.base_mut().set_binary_data(Some(binary_data));
        self.send(context, message, headers).await
    }

    /// Sends a message decoded earlier together with its trailing data.
    ///
    /// Without trailing data this is a plain [`send`](Self::send).
    pub async fn send_message_with_extra_data<T: Message>(
        &self,
        context: &ProducerConnectionContext,
        message: MessageWithExtraData<T>,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<MessageId> {
        let (mut message, binary_data) = message.into_parts();
        match binary_data {
            Some(binary_data) => {
                self.send_with_binary_data(context, &mut message, Some(binary_data), headers)
                    .await
            }
            None => self.send(context, &mut message, headers).await,
        }
    }

    /// Sends `message` with a temporary reply queue and attaches `listener`
    /// to that queue before the request leaves.
    ///
    /// The reply consumer lives on the producer's session. The returned context
    /// closes it; the listener may also close it from
    /// [`on_attach`](BasicMessageListener::on_attach)'s context once done.
    pub async fn send_and_listen<M, L>(
        &self,
        context: &ProducerConnectionContext,
        message: &mut M,
        listener: Arc<L>,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<RpcConnectionContext>
    where
        M: BasicMessage + ?Sized,
        L: BasicMessageListener,
    {
        let reply_context = self.open_reply_consumer(context).await?;

        let response_listener = match self.attach(&reply_context, listener).await {
            Ok(response_listener) => response_listener,
            Err(err) => {
                release_reply_consumer(&reply_context).await;
                return Err(err);
            }
        };

        message.set_reply_to(Some(reply_context.destination().clone()));
        debug!(
            event = events::RPC_LISTEN_START,
            component = COMPONENT,
            reply_to = %reply_context.destination(),
            destination = %context.destination(),
            "listening for responses"
        );

        match self.send(context, message, headers).await {
            Ok(request_id) => Ok(RpcConnectionContext::new(
                reply_context,
                request_id,
                response_listener,
            )),
            Err(err) => {
                release_reply_consumer(&reply_context).await;
                Err(err)
            }
        }
    }

    /// Sends `request` and waits up to `timeout` for one reply on a temporary
    /// queue. Returns `Ok(None)` when nothing arrived in time.
    pub async fn send_rpc<M, R>(
        &self,
        context: &ProducerConnectionContext,
        request: &mut M,
        headers: Option<&HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<Option<R>>
    where
        M: BasicMessage + ?Sized,
        R: Decodable,
    {
        let reply_context = self.open_reply_consumer(context).await?;
        request.set_reply_to(Some(reply_context.destination().clone()));

        let outcome = match self.send(context, request, headers).await {
            Ok(request_id) => reply_context
                .consumer()
                .receive(timeout)
                .await
                .map(|reply| (request_id, reply)),
            Err(err) => Err(err),
        };
        release_reply_consumer(&reply_context).await;

        let (request_id, reply) = outcome?;
        match reply {
            Some(wire) => R::decode_from(&self.serializer, wire).map(Some),
            None => {
                debug!(
                    event = events::RPC_TIMEOUT,
                    component = COMPONENT,
                    msg_id = %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "no response before timeout"
                );
                Ok(None)
            }
        }
    }

    /// Attaches `listener` to the context's consumer.
    pub async fn listen<L: BasicMessageListener>(
        &self,
        context: &ConsumerConnectionContext,
        listener: Arc<L>,
    ) -> Result<()> {
        self.attach(context, listener).await.map(|_| ())
    }

    pub(crate) async fn attach<L: BasicMessageListener>(
        &self,
        context: &ConsumerConnectionContext,
        listener: Arc<L>,
    ) -> Result<Arc<dyn WireListener>> {
        context.context().ensure_open()?;
        listener.on_attach(context);

        let adapter: Arc<dyn WireListener> =
            Arc::new(DecodingListener::new(listener, self.serializer.clone()));
        context
            .consumer()
            .set_message_listener(Some(adapter.clone()))
            .await?;

        debug!(
            event = events::LISTENER_ATTACH,
            component = COMPONENT,
            destination = %context.destination(),
            "listener attached"
        );
        Ok(adapter)
    }

    async fn transmit<M: BasicMessage + ?Sized>(
        &self,
        context: &ProducerConnectionContext,
        message: &mut M,
        wire: WireMessage,
    ) -> Result<MessageId> {
        match context.producer().send(wire).await {
            Ok(message_id) => {
                message.set_message_id(Some(message_id.clone()));
                debug!(
                    event = events::SEND_OK,
                    component = COMPONENT,
                    msg_id = %message_id,
                    msg_type = message.message_type(),
                    destination = %context.destination(),
                    "message sent"
                );
                Ok(message_id)
            }
            Err(err) => {
                warn!(
                    event = events::SEND_FAILED,
                    component = COMPONENT,
                    msg_type = message.message_type(),
                    destination = %context.destination(),
                    err = %err,
                    "unable to send message"
                );
                Err(err)
            }
        }
    }

    async fn open_reply_consumer(
        &self,
        context: &ProducerConnectionContext,
    ) -> Result<ConsumerConnectionContext> {
        let connection_context = context.context();
        connection_context.ensure_open()?;

        let session = connection_context.session();
        let reply_queue = session.create_temporary_queue().await?;
        let consumer = session.create_consumer(&reply_queue, None).await?;
        Ok(ConsumerConnectionContext::new(
            connection_context.with_destination(reply_queue),
            consumer,
        ))
    }
}

async fn release_reply_consumer(context: &ConsumerConnectionContext) {
    if let Err(err) = context.close().await {
        debug!(
            event = events::CONTEXT_CLOSE_FAILED,
            component = COMPONENT,
            reply_to = %fields::format_destination(Some(context.destination())),
            err = %err,
            "unable to close reply consumer"
        );
    }
}
