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

//! The queue/topic transport the bus runs on top of.
//!
//! These traits are the seam between the bus and a concrete broker client. The
//! object model is the classic one: a factory hands out connections, a connection
//! hands out sessions, and a session creates destinations, producers and
//! consumers. Sessions are always non-transacted and acknowledge automatically.

use crate::binary_data::InputStream;
use crate::endpoint::EndpointType;
use crate::error::Result;
use crate::message_id::MessageId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// A resolved queue or topic as known to the transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    kind: EndpointType,
    name: String,
    temporary: bool,
}

impl Destination {
    pub fn new(kind: EndpointType, name: impl Into<String>, temporary: bool) -> Self {
        Self {
            kind,
            name: name.into(),
            temporary,
        }
    }

    pub fn kind(&self) -> EndpointType {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.kind {
            EndpointType::Queue => "queue",
            EndpointType::Topic => "topic",
        };
        write!(f, "{scheme}://{}", self.name)
    }
}

/// Payload of a transport message.
pub enum WireBody {
    Text(String),
    Bytes(Box<dyn InputStream>),
}

impl Debug for WireBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WireBody::Text(text) => write!(f, "Text({} chars)", text.len()),
            WireBody::Bytes(_) => write!(f, "Bytes(..)"),
        }
    }
}

/// A message as the transport sees it: string properties plus a body.
#[derive(Debug)]
pub struct WireMessage {
    pub message_id: Option<MessageId>,
    pub correlation_id: Option<MessageId>,
    pub reply_to: Option<Destination>,
    pub properties: HashMap<String, String>,
    pub body: WireBody,
}

impl WireMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_body(WireBody::Text(text.into()))
    }

    pub fn bytes(stream: impl InputStream + 'static) -> Self {
        Self::with_body(WireBody::Bytes(Box::new(stream)))
    }

    fn with_body(body: WireBody) -> Self {
        Self {
            message_id: None,
            correlation_id: None,
            reply_to: None,
            properties: HashMap::new(),
            body,
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn text_body(&self) -> Option<&str> {
        match &self.body {
            WireBody::Text(text) => Some(text),
            WireBody::Bytes(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.body, WireBody::Text(_))
    }
}

/// Per-delivery callback attached to a consumer.
#[async_trait]
pub trait WireListener: Send + Sync {
    async fn on_message(&self, message: WireMessage);
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create_connection(&self) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Starts delivery to listeners. Starting a started connection is a no-op.
    async fn start(&self) -> Result<()>;

    async fn create_session(&self) -> Result<Arc<dyn Session>>;

    /// Closes the connection and everything created from it, including its
    /// temporary destinations.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Session: Send + Sync {
    async fn create_queue(&self, name: &str) -> Result<Destination>;

    async fn create_topic(&self, name: &str) -> Result<Destination>;

    async fn create_temporary_queue(&self) -> Result<Destination>;

    async fn create_temporary_topic(&self) -> Result<Destination>;

    async fn create_producer(&self, destination: &Destination)
        -> Result<Arc<dyn MessageProducer>>;

    /// `selector` filters deliveries by message properties; `None` matches everything.
    async fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&str>,
    ) -> Result<Arc<dyn MessageConsumer>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait MessageProducer: Send + Sync {
    fn destination(&self) -> &Destination;

    /// Hands the message to the transport and returns the id it assigned.
    async fn send(&self, message: WireMessage) -> Result<MessageId>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait MessageConsumer: Send + Sync {
    fn destination(&self) -> &Destination;

    /// Waits up to `timeout` for the next message.
    async fn receive(&self, timeout: Duration) -> Result<Option<WireMessage>>;

    /// Replaces the consumer's listener. `None` detaches it.
    async fn set_message_listener(&self, listener: Option<Arc<dyn WireListener>>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
