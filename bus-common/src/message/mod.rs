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

//! Application messages.
//!
//! A concrete message is a serde struct that embeds a [`MessageBase`] and
//! implements [`Message`]. The base carries everything that travels out-of-band
//! of the JSON body (ids, headers, reply-to and trailing binary data), so it is
//! always `#[serde(skip)]`.
//!
//! ```
//! use bus_common::message::{Message, MessageBase};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Ping {
//!     #[serde(skip)]
//!     base: MessageBase,
//!     text: String,
//! }
//!
//! impl Message for Ping {
//!     const MESSAGE_TYPE: &'static str = "example.Ping";
//!
//!     fn message_base(&self) -> &MessageBase {
//!         &self.base
//!     }
//!
//!     fn message_base_mut(&mut self) -> &mut MessageBase {
//!         &mut self.base
//!     }
//! }
//! ```

mod object;
mod simple;

pub use object::ObjectMessage;
pub use simple::SimpleBasicMessage;

use crate::binary_data::BinaryData;
use crate::error::{BusError, Result};
use crate::message_id::MessageId;
use crate::transport::Destination;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

/// Out-of-band state shared by every message.
#[derive(Default)]
pub struct MessageBase {
    message_id: Option<MessageId>,
    correlation_id: Option<MessageId>,
    headers: HashMap<String, String>,
    reply_to: Option<Destination>,
    binary_data: Option<BinaryData>,
}

impl MessageBase {
    pub fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    pub fn set_message_id(&mut self, message_id: Option<MessageId>) {
        self.message_id = message_id;
    }

    pub fn correlation_id(&self) -> Option<&MessageId> {
        self.correlation_id.as_ref()
    }

    pub fn set_correlation_id(&mut self, correlation_id: Option<MessageId>) {
        self.correlation_id = correlation_id;
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Replaces all headers with a private copy of `headers`. An empty input clears them.
    pub fn set_headers<I, K, V>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers = headers
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
    }

    pub fn reply_to(&self) -> Option<&Destination> {
        self.reply_to.as_ref()
    }

    pub fn set_reply_to(&mut self, reply_to: Option<Destination>) {
        self.reply_to = reply_to;
    }

    pub fn binary_data(&self) -> Option<&BinaryData> {
        self.binary_data.as_ref()
    }

    pub fn binary_data_mut(&mut self) -> Option<&mut BinaryData> {
        self.binary_data.as_mut()
    }

    pub fn set_binary_data(&mut self, binary_data: Option<BinaryData>) {
        self.binary_data = binary_data;
    }

    pub fn take_binary_data(&mut self) -> Option<BinaryData> {
        self.binary_data.take()
    }
}

impl Debug for MessageBase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBase")
            .field("message_id", &self.message_id)
            .field("correlation_id", &self.correlation_id)
            .field("headers", &self.headers)
            .field("reply_to", &self.reply_to)
            .field("has_binary_data", &self.binary_data.is_some())
            .finish()
    }
}

/// A concrete, serde-encodable message type.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Logical type tag stamped on every envelope carrying this message.
    const MESSAGE_TYPE: &'static str;

    fn message_base(&self) -> &MessageBase;

    fn message_base_mut(&mut self) -> &mut MessageBase;
}

/// Object-safe view over any [`Message`].
pub trait BasicMessage: Send + 'static {
    fn message_type(&self) -> &'static str;

    fn base(&self) -> &MessageBase;

    fn base_mut(&mut self) -> &mut MessageBase;

    fn to_json(&self) -> Result<String>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    fn message_id(&self) -> Option<&MessageId> {
        self.base().message_id()
    }

    fn set_message_id(&mut self, message_id: Option<MessageId>) {
        self.base_mut().set_message_id(message_id)
    }

    fn correlation_id(&self) -> Option<&MessageId> {
        self.base().correlation_id()
    }

    fn set_correlation_id(&mut self, correlation_id: Option<MessageId>) {
        self.base_mut().set_correlation_id(correlation_id)
    }

    fn headers(&self) -> &HashMap<String, String> {
        self.base().headers()
    }

    fn reply_to(&self) -> Option<&Destination> {
        self.base().reply_to()
    }

    fn set_reply_to(&mut self, reply_to: Option<Destination>) {
        self.base_mut().set_reply_to(reply_to)
    }

    fn binary_data(&self) -> Option<&BinaryData> {
        self.base().binary_data()
    }
}

impl<T: Message> BasicMessage for T {
    fn message_type(&self) -> &'static str {
        T::MESSAGE_TYPE
    }

    fn base(&self) -> &MessageBase {
        self.message_base()
    }

    fn base_mut(&mut self) -> &mut MessageBase {
        self.message_base_mut()
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(BusError::Encode)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl dyn BasicMessage {
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast<T: Message>(self: Box<Self>) -> Result<Box<T>> {
        let actual = self.message_type();
        self.into_any()
            .downcast::<T>()
            .map_err(|_| BusError::TypeMismatch {
                expected: T::MESSAGE_TYPE.to_string(),
                actual: actual.to_string(),
            })
    }
}

impl Debug for dyn BasicMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.message_type())
            .field("base", self.base())
            .finish_non_exhaustive()
    }
}

/// A decoded message together with the trailing binary data that followed it.
#[derive(Debug)]
pub struct MessageWithExtraData<T> {
    message: T,
    binary_data: Option<BinaryData>,
}

impl<T> MessageWithExtraData<T> {
    pub fn new(message: T, binary_data: Option<BinaryData>) -> Self {
        Self {
            message,
            binary_data,
        }
    }

    pub fn message(&self) -> &T {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut T {
        &mut self.message
    }

    pub fn binary_data(&self) -> Option<&BinaryData> {
        self.binary_data.as_ref()
    }

    pub fn into_parts(self) -> (T, Option<BinaryData>) {
        (self.message, self.binary_data)
    }
}

#[cfg(test)]
mod tests {
    use super::{BasicMessage, Message, MessageBase, SimpleBasicMessage};
    use crate::message::ObjectMessage;
    use crate::message_id::MessageId;
    use std::collections::HashMap;

    #[test]
    fn set_headers_replaces_instead_of_merging() {
        let mut base = MessageBase::default();
        base.set_headers([("a", "1")]);
        base.set_headers([("b", "2")]);

        let expected: HashMap<String, String> = [("b".to_string(), "2".to_string())].into();
        assert_eq!(base.headers(), &expected);
    }

    #[test]
    fn set_headers_keeps_a_private_copy() {
        let mut input = HashMap::new();
        input.insert("x".to_string(), "1".to_string());

        let mut base = MessageBase::default();
        base.set_headers(&input);
        input.insert("y".to_string(), "2".to_string());
        input.insert("x".to_string(), "changed".to_string());

        assert_eq!(base.headers().len(), 1);
        assert_eq!(base.headers().get("x").map(String::as_str), Some("1"));
    }

    #[test]
    fn empty_headers_clear_previous_ones() {
        let mut base = MessageBase::default();
        base.set_headers([("a", "1")]);
        base.set_headers(HashMap::<String, String>::new());
        assert!(base.headers().is_empty());
    }

    #[test]
    fn downcast_recovers_the_concrete_type() {
        let mut message = SimpleBasicMessage::new("hello");
        message.set_message_id(Some(MessageId::new("ID:7").expect("id")));
        let boxed: Box<dyn BasicMessage> = Box::new(message);

        assert!(boxed.is::<SimpleBasicMessage>());
        assert!(boxed.downcast_ref::<ObjectMessage>().is_none());

        let simple = boxed
            .downcast::<SimpleBasicMessage>()
            .expect("downcast to the original type");
        assert_eq!(simple.message(), "hello");
        assert_eq!(simple.message_id().map(MessageId::as_str), Some("ID:7"));
    }

    #[test]
    fn downcast_to_wrong_type_reports_both_tags() {
        let boxed: Box<dyn BasicMessage> = Box::new(SimpleBasicMessage::new("hello"));
        let err = boxed
            .downcast::<ObjectMessage>()
            .expect_err("wrong type must not downcast");
        assert!(err
            .to_string()
            .contains(<SimpleBasicMessage as Message>::MESSAGE_TYPE));
    }
}
