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

use crate::selector::Selector;
use crate::store::{lock, BrokerState, Mailbox, StoredBody, StoredMessage, Topic};
use async_trait::async_trait;
use bus_common::transport::{
    Connection, Destination, MessageConsumer, MessageProducer, Session, WireBody, WireListener,
    WireMessage,
};
use bus_common::{BusError, EndpointType, InputStream, MessageId, Result};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

const COMPONENT: &str = "broker_connection";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
    Stopped,
    Started,
    Closed,
}

struct ConnectionShared {
    id: Uuid,
    broker: Arc<BrokerState>,
    state: watch::Sender<ConnectionState>,
    refuse_start: bool,
    temporaries: Mutex<Vec<Destination>>,
}

impl ConnectionShared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn ensure_open(&self, what: &str) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(BusError::IllegalState(format!(
                "cannot {what}: connection {} is closed",
                self.id
            )));
        }
        Ok(())
    }
}

/// One client connection to an [`EmbeddedBroker`](crate::EmbeddedBroker).
///
/// Listeners only receive deliveries while the connection is started.
/// Closing it deletes the temporary destinations created through it.
pub struct BrokerConnection {
    shared: Arc<ConnectionShared>,
}

impl BrokerConnection {
    pub(crate) fn new(broker: Arc<BrokerState>, refuse_start: bool) -> Self {
        let (state, _) = watch::channel(ConnectionState::Stopped);
        Self {
            shared: Arc::new(ConnectionShared {
                id: Uuid::new_v4(),
                broker,
                state,
                refuse_start,
                temporaries: Mutex::new(Vec::new()),
            }),
        }
    }
}

#[async_trait]
impl Connection for BrokerConnection {
    async fn start(&self) -> Result<()> {
        self.shared.ensure_open("start")?;
        if self.shared.refuse_start {
            return Err(BusError::Transport(format!(
                "connection {} refused to start",
                self.shared.id
            )));
        }
        self.shared.state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Started;
            *state = ConnectionState::Started;
            changed
        });
        Ok(())
    }

    async fn create_session(&self) -> Result<Arc<dyn Session>> {
        self.shared.ensure_open("create a session")?;
        Ok(Arc::new(BrokerSession {
            connection: self.shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.shared.state.send_replace(ConnectionState::Closed) == ConnectionState::Closed {
            return Ok(());
        }

        let temporaries = std::mem::take(&mut *lock(&self.shared.temporaries));
        for destination in &temporaries {
            self.shared.broker.delete_temporary(destination);
        }
        debug!(
            component = COMPONENT,
            connection = %self.shared.id,
            temporaries = temporaries.len(),
            "connection closed"
        );
        Ok(())
    }
}

struct BrokerSession {
    connection: Arc<ConnectionShared>,
    closed: AtomicBool,
}

impl BrokerSession {
    fn ensure_open(&self, what: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::IllegalState(format!(
                "cannot {what}: session is closed"
            )));
        }
        self.connection.ensure_open(what)
    }

    fn create_temporary(&self, kind: EndpointType) -> Result<Destination> {
        self.ensure_open("create a temporary destination")?;
        let destination = self.connection.broker.create_temporary(kind);
        lock(&self.connection.temporaries).push(destination.clone());
        Ok(destination)
    }
}

fn named(kind: EndpointType, name: &str) -> Result<Destination> {
    if name.trim().is_empty() {
        return Err(BusError::InvalidArgument(
            "destination name must not be empty".to_string(),
        ));
    }
    Ok(Destination::new(kind, name, false))
}

#[async_trait]
impl Session for BrokerSession {
    async fn create_queue(&self, name: &str) -> Result<Destination> {
        self.ensure_open("create a queue")?;
        named(EndpointType::Queue, name)
    }

    async fn create_topic(&self, name: &str) -> Result<Destination> {
        self.ensure_open("create a topic")?;
        named(EndpointType::Topic, name)
    }

    async fn create_temporary_queue(&self) -> Result<Destination> {
        self.create_temporary(EndpointType::Queue)
    }

    async fn create_temporary_topic(&self) -> Result<Destination> {
        self.create_temporary(EndpointType::Topic)
    }

    async fn create_producer(&self, destination: &Destination) -> Result<Arc<dyn MessageProducer>> {
        self.ensure_open("create a producer")?;
        Ok(Arc::new(BrokerProducer {
            connection: self.connection.clone(),
            destination: destination.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&str>,
    ) -> Result<Arc<dyn MessageConsumer>> {
        self.ensure_open("create a consumer")?;
        let selector = match selector.filter(|selector| !selector.trim().is_empty()) {
            Some(selector) => Some(Arc::new(Selector::parse(selector)?)),
            None => None,
        };

        let source = match destination.kind() {
            EndpointType::Queue => ConsumerSource::Queue {
                mailbox: self.connection.broker.queue(destination)?,
                selector,
            },
            EndpointType::Topic => {
                let topic = self.connection.broker.topic(destination)?;
                let (subscription, mailbox) = topic.subscribe(selector);
                ConsumerSource::Topic {
                    topic,
                    subscription,
                    mailbox,
                }
            }
        };

        Ok(Arc::new(BrokerConsumer {
            connection: self.connection.clone(),
            destination: destination.clone(),
            source,
            delivery: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct BrokerProducer {
    connection: Arc<ConnectionShared>,
    destination: Destination,
    closed: AtomicBool,
}

/// Reads a binary body to the end off the async runtime, then closes it.
async fn drain(mut stream: Box<dyn InputStream>) -> Result<Arc<[u8]>> {
    tokio::task::spawn_blocking(move || {
        let mut bytes = Vec::new();
        let read = stream.read_to_end(&mut bytes);
        let closed = stream.close();
        read?;
        closed?;
        Ok::<_, std::io::Error>(Arc::from(bytes))
    })
    .await
    .map_err(|err| BusError::Transport(format!("reading message body failed: {err}")))?
    .map_err(BusError::Io)
}

#[async_trait]
impl MessageProducer for BrokerProducer {
    fn destination(&self) -> &Destination {
        &self.destination
    }

    async fn send(&self, message: WireMessage) -> Result<MessageId> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::IllegalState("producer is closed".to_string()));
        }
        self.connection.ensure_open("send")?;

        let WireMessage {
            correlation_id,
            reply_to,
            properties,
            body,
            ..
        } = message;
        let body = match body {
            WireBody::Text(text) => StoredBody::Text(text),
            WireBody::Bytes(stream) => StoredBody::Bytes(drain(stream).await?),
        };

        let message_id = MessageId::new(format!("ID:{}", Uuid::new_v4()))?;
        self.connection.broker.publish(
            &self.destination,
            StoredMessage {
                message_id: message_id.clone(),
                correlation_id,
                reply_to,
                properties,
                body,
            },
        )?;

        debug!(
            component = COMPONENT,
            destination = %self.destination,
            msg_id = %message_id,
            "message stored"
        );
        Ok(message_id)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

enum ConsumerSource {
    Queue {
        mailbox: Arc<Mailbox>,
        selector: Option<Arc<Selector>>,
    },
    Topic {
        topic: Arc<Topic>,
        subscription: Uuid,
        mailbox: Arc<Mailbox>,
    },
}

impl ConsumerSource {
    /// The mailbox to read from and the selector still to apply on take.
    /// Topic subscriptions are filtered when published to.
    fn parts(&self) -> (Arc<Mailbox>, Option<Arc<Selector>>) {
        match self {
            ConsumerSource::Queue { mailbox, selector } => (mailbox.clone(), selector.clone()),
            ConsumerSource::Topic { mailbox, .. } => (mailbox.clone(), None),
        }
    }
}

struct Delivery {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Delivery {
    /// Lets an in-flight callback finish; no new message is taken afterwards.
    fn stop(self) {
        self.stop.notify_one();
        drop(self.task);
    }
}

struct BrokerConsumer {
    connection: Arc<ConnectionShared>,
    destination: Destination,
    source: ConsumerSource,
    delivery: Mutex<Option<Delivery>>,
    closed: AtomicBool,
}

impl BrokerConsumer {
    fn ensure_open(&self, what: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::IllegalState(format!(
                "cannot {what}: consumer on {} is closed",
                self.destination
            )));
        }
        self.connection.ensure_open(what)
    }

    fn stop_delivery(&self) {
        if let Some(delivery) = lock(&self.delivery).take() {
            delivery.stop();
        }
    }
}

async fn deliver(
    mailbox: Arc<Mailbox>,
    selector: Option<Arc<Selector>>,
    mut state: watch::Receiver<ConnectionState>,
    stop: Arc<Notify>,
    listener: Arc<dyn WireListener>,
) {
    loop {
        let ready = tokio::select! {
            biased;
            _ = stop.notified() => return,
            ready = state.wait_for(|state| *state != ConnectionState::Stopped) => {
                ready.map(|state| *state)
            }
        };
        if !matches!(ready, Ok(ConnectionState::Started)) {
            return;
        }

        let message = tokio::select! {
            biased;
            _ = stop.notified() => return,
            message = mailbox.take(selector.as_deref()) => message,
        };
        listener.on_message(message.to_wire()).await;
    }
}

#[async_trait]
impl MessageConsumer for BrokerConsumer {
    fn destination(&self) -> &Destination {
        &self.destination
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<WireMessage>> {
        self.ensure_open("receive")?;
        let (mailbox, selector) = self.source.parts();
        match tokio::time::timeout(timeout, mailbox.take(selector.as_deref())).await {
            Ok(message) => Ok(Some(message.to_wire())),
            Err(_) => Ok(None),
        }
    }

    async fn set_message_listener(&self, listener: Option<Arc<dyn WireListener>>) -> Result<()> {
        self.stop_delivery();
        let Some(listener) = listener else {
            return Ok(());
        };
        self.ensure_open("set a message listener")?;

        let (mailbox, selector) = self.source.parts();
        let stop = Arc::new(Notify::new());
        let task = tokio::spawn(deliver(
            mailbox,
            selector,
            self.connection.state.subscribe(),
            stop.clone(),
            listener,
        ));
        *lock(&self.delivery) = Some(Delivery { stop, task });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_delivery();
        if let ConsumerSource::Topic {
            topic,
            subscription,
            ..
        } = &self.source
        {
            topic.unsubscribe(subscription);
        }
        Ok(())
    }
}

impl Drop for BrokerConsumer {
    fn drop(&mut self) {
        self.stop_delivery();
        if let ConsumerSource::Topic {
            topic,
            subscription,
            ..
        } = &self.source
        {
            topic.unsubscribe(subscription);
        }
    }
}
