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

//! Typed messaging over a queue/topic transport.
//!
//! Application messages are serde types implementing [`Message`]. The
//! [`MessageSerializer`] turns them into transport envelopes: a JSON body plus
//! string properties, one of which names the message type, and optionally a
//! trailing binary stream. [`MessageProcessor`] sends envelopes through
//! contexts built by a [`ConnectionContextFactory`], sets up request/response
//! exchanges over temporary reply queues, and attaches listeners. [`Bus`]
//! wraps all of it behind one handle and tracks listener [`Registration`]s.
//!
//! The transport itself sits behind the traits in [`transport`]; the
//! `embedded-broker` crate in this workspace implements them in process.
//!
//! ```
//! use bus_common::{Bus, BusConfig, Endpoint, SimpleBasicMessage};
//! use embedded_broker::EmbeddedBroker;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> bus_common::Result<()> {
//! let bus = Bus::new(Arc::new(EmbeddedBroker::new()), BusConfig::default());
//! let queue = Endpoint::queue("greetings");
//!
//! bus.send(&queue, &mut SimpleBasicMessage::new("hello"), None).await?;
//! let received: Option<SimpleBasicMessage> = bus
//!     .receive_timeout(&queue, None, Duration::from_secs(1))
//!     .await?;
//! assert_eq!(received.as_ref().map(|m| m.message()), Some("hello"));
//!
//! bus.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod binary_data;
pub mod bus;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod message;
pub mod message_id;
pub mod processor;
pub mod registration;
pub mod serializer;
pub mod transport;

#[doc(hidden)]
pub mod observability;

pub use binary_data::{BinaryData, InputStream};
pub use bus::Bus;
pub use config::BusConfig;
pub use context::{
    ConnectionContext, ConnectionContextFactory, ConnectionStrategy, ConsumerConnectionContext,
    ProducerConnectionContext, RpcConnectionContext,
};
pub use endpoint::{Endpoint, EndpointType};
pub use error::{BusError, Result};
pub use listener::{BasicMessageListener, DecodingListener, RpcListener, RpcMessageHandler};
pub use message::{
    BasicMessage, Message, MessageBase, MessageWithExtraData, ObjectMessage, SimpleBasicMessage,
};
pub use message_id::MessageId;
pub use processor::MessageProcessor;
pub use registration::{Registration, RegistrationKey};
pub use serializer::{Decodable, MessageSerializer, HEADER_BASIC_MESSAGE_CLASS};
