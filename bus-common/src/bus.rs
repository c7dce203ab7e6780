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

//! High level entry point: send, receive, request/response and listener
//! registrations over one [`ConnectionFactory`].

use crate::binary_data::BinaryData;
use crate::config::BusConfig;
use crate::context::{
    ConnectionContextFactory, ConsumerConnectionContext, ProducerConnectionContext,
};
use crate::endpoint::Endpoint;
use crate::error::{BusError, Result};
use crate::listener::BasicMessageListener;
use crate::message::BasicMessage;
use crate::message_id::MessageId;
use crate::observability::{events, fields};
use crate::processor::MessageProcessor;
use crate::registration::{self, Registration, RegistrationKey, RegistrationTable};
use crate::serializer::{Decodable, MessageSerializer};
use crate::transport::ConnectionFactory;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "bus";

/// Messaging facade.
///
/// Sends and receives go through short-lived contexts from a factory that
/// follows [`BusConfig::connection_strategy`]. Every registration gets a
/// connection of its own so it can be torn down independently.
///
/// Call [`shutdown`](Self::shutdown) when done; it cancels every registration
/// that is still active.
pub struct Bus {
    config: BusConfig,
    contexts: ConnectionContextFactory,
    listener_contexts: ConnectionContextFactory,
    processor: MessageProcessor,
    registrations: Arc<RegistrationTable>,
}

impl Bus {
    pub fn new(connection_factory: Arc<dyn ConnectionFactory>, config: BusConfig) -> Self {
        Self::with_serializer(connection_factory, config, MessageSerializer::new())
    }

    /// Uses `serializer` for every encode and decode, e.g. one with extra
    /// message types registered.
    pub fn with_serializer(
        connection_factory: Arc<dyn ConnectionFactory>,
        config: BusConfig,
        serializer: MessageSerializer,
    ) -> Self {
        Self {
            contexts: ConnectionContextFactory::new(
                connection_factory.clone(),
                config.connection_strategy(),
            ),
            listener_contexts: ConnectionContextFactory::per_context(connection_factory),
            processor: MessageProcessor::with_serializer(Arc::new(serializer)),
            registrations: Arc::new(RegistrationTable::default()),
            config,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn processor(&self) -> &MessageProcessor {
        &self.processor
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// Sends `message` to `endpoint`. `headers` override the message's own.
    pub async fn send<M: BasicMessage + ?Sized>(
        &self,
        endpoint: &Endpoint,
        message: &mut M,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<MessageId> {
        let context = self.contexts.create_producer_context(endpoint).await?;
        let outcome = self.processor.send(&context, message, headers).await;
        release_producer(&context).await;
        outcome
    }

    /// Sends `message` followed by the bytes of `binary_data`.
    pub async fn send_with_binary_data<M: BasicMessage + ?Sized>(
        &self,
        endpoint: &Endpoint,
        message: &mut M,
        binary_data: BinaryData,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<MessageId> {
        let context = self.contexts.create_producer_context(endpoint).await?;
        let outcome = self
            .processor
            .send_with_binary_data(&context, message, Some(binary_data), headers)
            .await;
        release_producer(&context).await;
        outcome
    }

    /// Polls `endpoint` for one message using the configured default timeout.
    pub async fn receive<T: Decodable>(
        &self,
        endpoint: &Endpoint,
        selector: Option<&str>,
    ) -> Result<Option<T>> {
        self.receive_timeout(endpoint, selector, self.config.default_receive_timeout())
            .await
    }

    /// Waits up to `timeout` for one message from `endpoint`.
    ///
    /// A zero timeout is raised to 1 ms.
    pub async fn receive_timeout<T: Decodable>(
        &self,
        endpoint: &Endpoint,
        selector: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<T>> {
        let timeout = timeout.max(Duration::from_millis(1));
        let context = self
            .contexts
            .create_consumer_context(endpoint, selector)
            .await?;
        let outcome = context.consumer().receive(timeout).await;
        release_consumer(&context).await;

        match outcome? {
            Some(wire) => {
                debug!(
                    event = events::RECEIVE_OK,
                    component = COMPONENT,
                    destination = %context.destination(),
                    msg_id = %fields::format_optional_id(wire.message_id.as_ref()),
                    "message received"
                );
                T::decode_from(self.processor.serializer(), wire).map(Some)
            }
            None => {
                debug!(
                    event = events::RECEIVE_EMPTY,
                    component = COMPONENT,
                    destination = %context.destination(),
                    selector = %fields::format_selector(selector),
                    "no message before timeout"
                );
                Ok(None)
            }
        }
    }

    /// Sends `request` with a fresh temporary reply queue and waits up to
    /// `timeout` for the first reply.
    pub async fn send_and_receive<Req, Resp>(
        &self,
        endpoint: &Endpoint,
        request: &mut Req,
        timeout: Duration,
    ) -> Result<Option<Resp>>
    where
        Req: BasicMessage + ?Sized,
        Resp: Decodable,
    {
        let context = self.contexts.create_producer_context(endpoint).await?;
        let outcome = self
            .processor
            .send_rpc(&context, request, None, timeout)
            .await;
        release_producer(&context).await;
        outcome
    }

    /// Registers `listener` under a generated name.
    pub async fn register<L: BasicMessageListener>(
        &self,
        endpoint: &Endpoint,
        listener: Arc<L>,
        selector: Option<&str>,
    ) -> Result<Registration> {
        let name = Uuid::new_v4().to_string();
        self.register_named(&name, endpoint, listener, selector)
            .await
    }

    /// Registers `listener` on its own connection.
    ///
    /// Registering the same name twice for one destination and selector fails
    /// with [`BusError::InvalidArgument`]. A failed registration leaves nothing
    /// behind.
    pub async fn register_named<L: BasicMessageListener>(
        &self,
        name: &str,
        endpoint: &Endpoint,
        listener: Arc<L>,
        selector: Option<&str>,
    ) -> Result<Registration> {
        if name.trim().is_empty() {
            return Err(BusError::InvalidArgument(
                "listener name must not be empty".to_string(),
            ));
        }

        let context = match self
            .listener_contexts
            .create_consumer_context(endpoint, selector)
            .await
        {
            Ok(context) => context,
            Err(err) => {
                warn!(
                    event = events::REGISTRATION_ADD_FAILED,
                    component = COMPONENT,
                    listener_name = name,
                    destination = %endpoint,
                    selector = %fields::format_selector(selector),
                    err = %err,
                    "unable to open listener context"
                );
                return Err(err);
            }
        };

        let key = RegistrationKey::new(context.destination().name(), name, selector);
        let registration =
            registration::admit(&self.registrations, key, context.clone()).await?;

        if let Err(err) = self.processor.attach(&context, listener).await {
            warn!(
                event = events::REGISTRATION_ADD_FAILED,
                component = COMPONENT,
                registration = %registration,
                err = %err,
                "unable to attach listener"
            );
            registration.cancel().await;
            return Err(err);
        }

        Ok(registration)
    }

    /// Same as [`Registration::cancel`].
    pub async fn cancel(&self, registration: &Registration) {
        registration.cancel().await;
    }

    /// Cancels every registration, then releases the shared connection.
    pub async fn shutdown(&self) {
        let keys = self.registrations.keys();
        info!(
            event = events::BUS_SHUTDOWN_START,
            component = COMPONENT,
            registrations = keys.len(),
            "shutting down bus"
        );

        join_all(keys.iter().map(|key| self.registrations.cancel(key))).await;
        self.contexts.close().await;
        self.listener_contexts.close().await;

        info!(
            event = events::BUS_SHUTDOWN_OK,
            component = COMPONENT,
            "bus shut down"
        );
    }
}

async fn release_producer(context: &ProducerConnectionContext) {
    if let Err(err) = context.close().await {
        debug!(
            event = events::CONTEXT_CLOSE_FAILED,
            component = COMPONENT,
            destination = %context.destination(),
            err = %err,
            "unable to close producer context"
        );
    }
}

async fn release_consumer(context: &ConsumerConnectionContext) {
    if let Err(err) = context.close().await {
        debug!(
            event = events::CONTEXT_CLOSE_FAILED,
            component = COMPONENT,
            destination = %context.destination(),
            err = %err,
            "unable to close consumer context"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::Bus;
    use crate::config::BusConfig;
    use crate::context::tests::{CloseLog, NoopFactory};
    use crate::endpoint::Endpoint;
    use crate::error::BusError;
    use crate::listener::BasicMessageListener;
    use crate::message::{BasicMessage, SimpleBasicMessage};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Ignore;

    #[async_trait]
    impl BasicMessageListener for Ignore {
        type Message = Box<dyn BasicMessage>;

        async fn on_basic_message(&self, _message: Box<dyn BasicMessage>) {}
    }

    fn bus(log: Arc<CloseLog>) -> Bus {
        Bus::new(Arc::new(NoopFactory { log }), BusConfig::default())
    }

    fn orders() -> Endpoint {
        Endpoint::queue("orders")
    }

    #[tokio::test]
    async fn send_writes_the_transport_id_back() {
        let bus = bus(Arc::default());
        let mut message = SimpleBasicMessage::new("hello");
        let id = bus
            .send(&orders(), &mut message, None)
            .await
            .expect("send");
        assert_eq!(message.message_id(), Some(&id));
    }

    #[tokio::test]
    async fn receive_on_an_empty_destination_yields_none() {
        let bus = bus(Arc::default());
        let received: Option<SimpleBasicMessage> =
            bus.receive(&orders(), None).await.expect("receive");
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn registrations_get_distinct_generated_names() {
        let bus = bus(Arc::default());
        let first = bus
            .register(&orders(), Arc::new(Ignore), None)
            .await
            .expect("first");
        let second = bus
            .register(&orders(), Arc::new(Ignore), None)
            .await
            .expect("second");

        assert_ne!(first, second);
        assert_eq!(bus.registration_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_named_registration_is_rejected() {
        let bus = bus(Arc::default());
        bus.register_named("audit", &orders(), Arc::new(Ignore), Some("x = '1'"))
            .await
            .expect("first");
        let err = bus
            .register_named("audit", &orders(), Arc::new(Ignore), Some("x = '1'"))
            .await
            .expect_err("duplicate");

        assert!(matches!(err, BusError::InvalidArgument(_)));
        assert_eq!(bus.registration_count(), 1);
    }

    #[tokio::test]
    async fn blank_listener_name_is_rejected() {
        let bus = bus(Arc::default());
        let err = bus
            .register_named(" ", &orders(), Arc::new(Ignore), None)
            .await
            .expect_err("blank name");
        assert!(matches!(err, BusError::InvalidArgument(_)));
        assert_eq!(bus.registration_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_every_registration() {
        let log = Arc::new(CloseLog::default());
        let bus = bus(log.clone());
        let registration = bus
            .register(&orders(), Arc::new(Ignore), None)
            .await
            .expect("register");
        bus.register(&Endpoint::topic("alerts"), Arc::new(Ignore), None)
            .await
            .expect("register");

        bus.shutdown().await;

        assert_eq!(bus.registration_count(), 0);
        assert!(!registration.is_active());
        registration.cancel().await;
        let connections = log.calls().iter().filter(|c| **c == "connection").count();
        assert_eq!(connections, 2);
    }
}
