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

//! Destination storage: queues, topics and the messages parked in them.

use crate::selector::Selector;
use bus_common::transport::{Destination, WireBody, WireMessage};
use bus_common::{BusError, EndpointType, MessageId, Result};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

const COMPONENT: &str = "broker_store";

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub(crate) enum StoredBody {
    Text(String),
    Bytes(Arc<[u8]>),
}

/// A message as the broker keeps it. Binary bodies are fully buffered so that
/// every delivery can get its own reader.
#[derive(Clone)]
pub(crate) struct StoredMessage {
    pub(crate) message_id: MessageId,
    pub(crate) correlation_id: Option<MessageId>,
    pub(crate) reply_to: Option<Destination>,
    pub(crate) properties: HashMap<String, String>,
    pub(crate) body: StoredBody,
}

impl StoredMessage {
    pub(crate) fn to_wire(&self) -> WireMessage {
        let body = match &self.body {
            StoredBody::Text(text) => WireBody::Text(text.clone()),
            StoredBody::Bytes(bytes) => WireBody::Bytes(Box::new(Cursor::new(bytes.clone()))),
        };
        WireMessage {
            message_id: Some(self.message_id.clone()),
            correlation_id: self.correlation_id.clone(),
            reply_to: self.reply_to.clone(),
            properties: self.properties.clone(),
            body,
        }
    }
}

/// FIFO of stored messages with a wake-up for waiting consumers.
#[derive(Default)]
pub(crate) struct Mailbox {
    messages: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
}

impl Mailbox {
    pub(crate) fn push(&self, message: StoredMessage) {
        lock(&self.messages).push_back(message);
        self.notify.notify_waiters();
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    /// Removes the oldest message `selector` accepts.
    pub(crate) fn try_take(&self, selector: Option<&Selector>) -> Option<StoredMessage> {
        let mut messages = lock(&self.messages);
        let index = match selector {
            None => (!messages.is_empty()).then_some(0),
            Some(selector) => messages
                .iter()
                .position(|message| selector.matches(&message.properties)),
        }?;
        messages.remove(index)
    }

    /// Waits for a message `selector` accepts.
    ///
    /// Cancel-safe: a message is only removed right before this returns.
    pub(crate) async fn take(&self, selector: Option<&Selector>) -> StoredMessage {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_take(selector) {
                return message;
            }
            notified.await;
        }
    }
}

struct Subscriber {
    selector: Option<Arc<Selector>>,
    mailbox: Arc<Mailbox>,
}

/// Topic fan-out: every subscriber present at publish time gets a copy.
#[derive(Default)]
pub(crate) struct Topic {
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
}

impl Topic {
    pub(crate) fn subscribe(&self, selector: Option<Arc<Selector>>) -> (Uuid, Arc<Mailbox>) {
        let id = Uuid::new_v4();
        let mailbox = Arc::new(Mailbox::default());
        lock(&self.subscribers).insert(
            id,
            Subscriber {
                selector,
                mailbox: mailbox.clone(),
            },
        );
        (id, mailbox)
    }

    pub(crate) fn unsubscribe(&self, id: &Uuid) {
        lock(&self.subscribers).remove(id);
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn publish(&self, message: &StoredMessage) -> usize {
        let subscribers = lock(&self.subscribers);
        let mut delivered = 0;
        for subscriber in subscribers.values() {
            let accepted = subscriber
                .selector
                .as_ref()
                .map_or(true, |selector| selector.matches(&message.properties));
            if accepted {
                subscriber.mailbox.push(message.clone());
                delivered += 1;
            }
        }
        delivered
    }
}

/// Every destination the broker knows about.
///
/// Named destinations spring into existence on first use. Temporary ones
/// exist from creation until deleted, and using them afterwards fails.
#[derive(Default)]
pub(crate) struct BrokerState {
    queues: DashMap<String, Arc<Mailbox>>,
    topics: DashMap<String, Arc<Topic>>,
}

impl BrokerState {
    pub(crate) fn queue(&self, destination: &Destination) -> Result<Arc<Mailbox>> {
        if destination.is_temporary() {
            return self
                .queues
                .get(destination.name())
                .map(|mailbox| mailbox.clone())
                .ok_or_else(|| gone(destination));
        }
        Ok(self
            .queues
            .entry(destination.name().to_string())
            .or_default()
            .clone())
    }

    pub(crate) fn topic(&self, destination: &Destination) -> Result<Arc<Topic>> {
        if destination.is_temporary() {
            return self
                .topics
                .get(destination.name())
                .map(|topic| topic.clone())
                .ok_or_else(|| gone(destination));
        }
        Ok(self
            .topics
            .entry(destination.name().to_string())
            .or_default()
            .clone())
    }

    pub(crate) fn create_temporary(&self, kind: EndpointType) -> Destination {
        let name = match kind {
            EndpointType::Queue => {
                let name = format!("temp-queue-{}", Uuid::new_v4());
                self.queues.insert(name.clone(), Arc::default());
                name
            }
            EndpointType::Topic => {
                let name = format!("temp-topic-{}", Uuid::new_v4());
                self.topics.insert(name.clone(), Arc::default());
                name
            }
        };
        debug!(component = COMPONENT, destination = %name, "temporary destination created");
        Destination::new(kind, name, true)
    }

    pub(crate) fn delete_temporary(&self, destination: &Destination) {
        if !destination.is_temporary() {
            return;
        }
        match destination.kind() {
            EndpointType::Queue => {
                self.queues.remove(destination.name());
            }
            EndpointType::Topic => {
                self.topics.remove(destination.name());
            }
        }
        debug!(component = COMPONENT, destination = %destination, "temporary destination deleted");
    }

    pub(crate) fn publish(&self, destination: &Destination, message: StoredMessage) -> Result<()> {
        match destination.kind() {
            EndpointType::Queue => self.queue(destination)?.push(message),
            EndpointType::Topic => {
                let delivered = self.topic(destination)?.publish(&message);
                debug!(
                    component = COMPONENT,
                    destination = %destination,
                    subscribers = delivered,
                    "published to topic"
                );
            }
        }
        Ok(())
    }

    pub(crate) fn queue_depth(&self, name: &str) -> usize {
        self.queues.get(name).map_or(0, |mailbox| mailbox.len())
    }

    pub(crate) fn topic_subscribers(&self, name: &str) -> usize {
        self.topics.get(name).map_or(0, |topic| topic.subscriber_count())
    }

    pub(crate) fn temporary_count(&self) -> usize {
        let queues = self
            .queues
            .iter()
            .filter(|entry| entry.key().starts_with("temp-queue-"))
            .count();
        let topics = self
            .topics
            .iter()
            .filter(|entry| entry.key().starts_with("temp-topic-"))
            .count();
        queues + topics
    }
}

fn gone(destination: &Destination) -> BusError {
    BusError::Transport(format!("{destination} no longer exists"))
}
