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

//! Connection/session/destination bundles handed to the message processor.
//!
//! Contexts are created by [`ConnectionContextFactory`] and closed by whoever
//! holds them. Clones share the same closed flag, so closing any clone closes
//! them all.

mod factory;

pub use factory::{ConnectionContextFactory, ConnectionStrategy};

use crate::error::{BusError, Result};
use crate::message_id::MessageId;
use crate::observability::events;
use crate::transport::{
    Connection, Destination, MessageConsumer, MessageProducer, Session, WireListener,
};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const COMPONENT: &str = "connection_context";

#[derive(Clone)]
pub struct ConnectionContext {
    connection: Arc<dyn Connection>,
    session: Arc<dyn Session>,
    destination: Destination,
    owns_session: bool,
    owns_connection: bool,
    closed: Arc<AtomicBool>,
}

impl ConnectionContext {
    pub(crate) fn new(
        connection: Arc<dyn Connection>,
        session: Arc<dyn Session>,
        destination: Destination,
        owns_connection: bool,
    ) -> Self {
        Self {
            connection,
            session,
            destination,
            owns_session: true,
            owns_connection,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Whether closing this context also closes the connection.
    pub fn owns_connection(&self) -> bool {
        self.owns_connection
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BusError::IllegalState(format!(
                "context for {} is closed",
                self.destination
            )));
        }
        Ok(())
    }

    /// A view on the same connection and session aimed at another destination.
    ///
    /// The view owns nothing: closing it leaves the session and connection open.
    pub fn with_destination(&self, destination: Destination) -> ConnectionContext {
        Self {
            connection: self.connection.clone(),
            session: self.session.clone(),
            destination,
            owns_session: false,
            owns_connection: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a producer for `destination` on this context's session.
    pub async fn create_producer_for(
        &self,
        destination: &Destination,
    ) -> Result<ProducerConnectionContext> {
        self.ensure_open()?;
        let producer = self.session.create_producer(destination).await?;
        Ok(ProducerConnectionContext::new(
            self.with_destination(destination.clone()),
            producer,
        ))
    }

    /// Closes the session, then the connection if this context owns it.
    ///
    /// The connection is closed even when closing the session fails. The first
    /// failure is returned. Closing twice is a no-op.
    pub async fn close(&self) -> std::io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first_failure: Option<BusError> = None;

        if self.owns_session {
            if let Err(err) = self.session.close().await {
                warn!(
                    event = events::SESSION_CLOSE_FAILED,
                    component = COMPONENT,
                    destination = %self.destination,
                    err = %err,
                    "unable to close session"
                );
                first_failure = Some(err);
            }
        }

        if self.owns_connection {
            if let Err(err) = self.connection.close().await {
                warn!(
                    event = events::CONNECTION_CLOSE_FAILED,
                    component = COMPONENT,
                    destination = %self.destination,
                    err = %err,
                    "unable to close connection; resources may leak"
                );
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err.into()),
            None => {
                debug!(
                    event = events::CONTEXT_CLOSE_OK,
                    component = COMPONENT,
                    destination = %self.destination,
                    "context closed"
                );
                Ok(())
            }
        }
    }
}

impl Debug for ConnectionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("destination", &self.destination)
            .field("owns_connection", &self.owns_connection)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A context with a producer bound to its destination.
#[derive(Clone)]
pub struct ProducerConnectionContext {
    context: ConnectionContext,
    producer: Arc<dyn MessageProducer>,
}

impl ProducerConnectionContext {
    pub(crate) fn new(context: ConnectionContext, producer: Arc<dyn MessageProducer>) -> Self {
        Self { context, producer }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn producer(&self) -> &Arc<dyn MessageProducer> {
        &self.producer
    }

    pub fn destination(&self) -> &Destination {
        self.context.destination()
    }

    /// Closes the producer, then the underlying context.
    pub async fn close(&self) -> std::io::Result<()> {
        if !self.context.is_closed() {
            if let Err(err) = self.producer.close().await {
                warn!(
                    event = events::CONTEXT_CLOSE_FAILED,
                    component = COMPONENT,
                    destination = %self.context.destination,
                    err = %err,
                    "unable to close producer"
                );
            }
        }
        self.context.close().await
    }
}

/// A context with a consumer reading from its destination.
#[derive(Clone)]
pub struct ConsumerConnectionContext {
    context: ConnectionContext,
    consumer: Arc<dyn MessageConsumer>,
}

impl ConsumerConnectionContext {
    pub(crate) fn new(context: ConnectionContext, consumer: Arc<dyn MessageConsumer>) -> Self {
        Self { context, consumer }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn consumer(&self) -> &Arc<dyn MessageConsumer> {
        &self.consumer
    }

    pub fn destination(&self) -> &Destination {
        self.context.destination()
    }

    /// Detaches any listener and closes the consumer, then the underlying context.
    pub async fn close(&self) -> std::io::Result<()> {
        if !self.context.is_closed() {
            if let Err(err) = self.consumer.set_message_listener(None).await {
                debug!(
                    event = events::CONTEXT_CLOSE_FAILED,
                    component = COMPONENT,
                    destination = %self.context.destination,
                    err = %err,
                    "unable to detach listener before close"
                );
            }
            if let Err(err) = self.consumer.close().await {
                warn!(
                    event = events::CONTEXT_CLOSE_FAILED,
                    component = COMPONENT,
                    destination = %self.context.destination,
                    err = %err,
                    "unable to close consumer"
                );
            }
        }
        self.context.close().await
    }
}

impl Debug for ProducerConnectionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerConnectionContext")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Debug for ConsumerConnectionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerConnectionContext")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Everything a request/response exchange set up on the caller's side.
///
/// The consumer reads from a temporary reply destination on the request's
/// session. Closing this context closes that consumer only; the temporary
/// destination goes away with its connection.
#[derive(Clone)]
pub struct RpcConnectionContext {
    consumer_context: ConsumerConnectionContext,
    request_id: MessageId,
    response_listener: Arc<dyn WireListener>,
}

impl RpcConnectionContext {
    pub(crate) fn new(
        consumer_context: ConsumerConnectionContext,
        request_id: MessageId,
        response_listener: Arc<dyn WireListener>,
    ) -> Self {
        Self {
            consumer_context,
            request_id,
            response_listener,
        }
    }

    pub fn consumer_context(&self) -> &ConsumerConnectionContext {
        &self.consumer_context
    }

    /// The temporary destination replies are expected on.
    pub fn reply_destination(&self) -> &Destination {
        self.consumer_context.destination()
    }

    pub fn request_id(&self) -> &MessageId {
        &self.request_id
    }

    pub fn response_listener(&self) -> &Arc<dyn WireListener> {
        &self.response_listener
    }

    pub async fn close(&self) -> std::io::Result<()> {
        self.consumer_context.close().await
    }
}

impl Debug for RpcConnectionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnectionContext")
            .field("reply_destination", self.reply_destination())
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
