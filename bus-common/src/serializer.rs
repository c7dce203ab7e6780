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

//! Envelope codec: typed messages to and from [`WireMessage`]s.
//!
//! Text envelopes carry the JSON body as a string. Binary envelopes carry the
//! JSON bytes immediately followed by the raw attachment bytes; on decode the
//! JSON head is parsed off the stream and whatever the parser buffered beyond it
//! is spliced back in front of the unread tail.

use crate::binary_data::{BinaryData, InputStream};
use crate::error::{BusError, Result};
use crate::message::{BasicMessage, Message, MessageBase, MessageWithExtraData};
use crate::message::{ObjectMessage, SimpleBasicMessage};
use crate::message_id::MessageId;
use crate::observability::{events, fields};
use crate::transport::{Destination, WireBody, WireMessage};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufReader, Read};
use tracing::debug;

const COMPONENT: &str = "message_serializer";

/// Reserved property naming the logical type of the enclosed message.
pub const HEADER_BASIC_MESSAGE_CLASS: &str = "basicMessageClassName";

type TextDecoder = fn(&str) -> serde_json::Result<Box<dyn BasicMessage>>;
type StreamDecoder = fn(&mut dyn Read) -> serde_json::Result<Box<dyn BasicMessage>>;

#[derive(Clone, Copy)]
struct Decoder {
    from_text: TextDecoder,
    from_stream: StreamDecoder,
}

fn decode_text<T: Message>(text: &str) -> serde_json::Result<Box<dyn BasicMessage>> {
    Ok(Box::new(serde_json::from_str::<T>(text)?))
}

fn decode_stream<T: Message>(reader: &mut dyn Read) -> serde_json::Result<Box<dyn BasicMessage>> {
    Ok(Box::new(parse_head::<T>(reader)?))
}

/// Parses exactly one JSON value off `reader` without insisting on end of input.
fn parse_head<T: Message>(reader: &mut dyn Read) -> serde_json::Result<T> {
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    T::deserialize(&mut deserializer)
}

/// Splits a body into the parsed message and, for binary bodies, the remaining bytes.
fn read_body<M>(
    body: WireBody,
    from_text: impl FnOnce(&str) -> serde_json::Result<M>,
    from_stream: impl FnOnce(&mut dyn Read) -> serde_json::Result<M>,
) -> Result<(M, Option<BinaryData>)> {
    match body {
        WireBody::Text(text) => Ok((from_text(&text).map_err(BusError::Decode)?, None)),
        WireBody::Bytes(stream) => {
            let (message, remainder) = split_stream(stream, from_stream)?;
            Ok((message, Some(remainder)))
        }
    }
}

fn split_stream<M>(
    stream: Box<dyn InputStream>,
    from_stream: impl FnOnce(&mut dyn Read) -> serde_json::Result<M>,
) -> Result<(M, BinaryData)> {
    let mut reader = BufReader::new(stream);
    let message = from_stream(&mut reader).map_err(BusError::Decode)?;
    let buffered = reader.buffer().to_vec();
    Ok((message, BinaryData::new(buffered, reader.into_inner())))
}

fn apply_envelope(
    base: &mut MessageBase,
    message_id: Option<MessageId>,
    correlation_id: Option<MessageId>,
    reply_to: Option<Destination>,
    properties: HashMap<String, String>,
    binary_data: Option<BinaryData>,
) {
    base.set_headers(properties);
    base.set_message_id(message_id);
    if correlation_id.is_some() {
        base.set_correlation_id(correlation_id);
    }
    if reply_to.is_some() {
        base.set_reply_to(reply_to);
    }
    base.set_binary_data(binary_data);
}

/// Encodes messages into envelopes and decodes envelopes back into messages.
///
/// Polymorphic decoding goes through a registry from type tag to decoder. The
/// built-in [`SimpleBasicMessage`] and [`ObjectMessage`] are always registered.
#[derive(Clone)]
pub struct MessageSerializer {
    decoders: HashMap<String, Decoder>,
    aliases: HashMap<String, String>,
}

impl Default for MessageSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSerializer {
    pub fn new() -> Self {
        let mut serializer = Self {
            decoders: HashMap::new(),
            aliases: HashMap::new(),
        };
        serializer.register::<SimpleBasicMessage>();
        serializer.register::<ObjectMessage>();
        serializer
    }

    /// Makes `T` decodable from envelopes tagged with `T::MESSAGE_TYPE`.
    pub fn register<T: Message>(&mut self) -> &mut Self {
        self.decoders.insert(
            T::MESSAGE_TYPE.to_string(),
            Decoder {
                from_text: decode_text::<T>,
                from_stream: decode_stream::<T>,
            },
        );
        self
    }

    /// Treats envelopes tagged `received` as if they were tagged `tag`.
    pub fn register_alias(
        &mut self,
        received: impl Into<String>,
        tag: impl Into<String>,
    ) -> &mut Self {
        self.aliases.insert(received.into(), tag.into());
        self
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.decoders.contains_key(self.resolve_tag(tag))
    }

    fn resolve_tag<'a>(&'a self, tag: &'a str) -> &'a str {
        self.aliases.get(tag).map(String::as_str).unwrap_or(tag)
    }

    pub fn to_json<M: BasicMessage + ?Sized>(&self, message: &M) -> Result<String> {
        message.to_json()
    }

    pub fn decode_json<T: Message>(&self, json: &str) -> Result<T> {
        serde_json::from_str(json).map_err(BusError::Decode)
    }

    /// Parses a JSON head off `stream` and returns the message with the bytes that follow it.
    pub fn decode_json_stream<T: Message>(
        &self,
        stream: impl InputStream + 'static,
    ) -> Result<MessageWithExtraData<T>> {
        let (message, remainder) = split_stream(Box::new(stream), parse_head::<T>)?;
        Ok(MessageWithExtraData::new(message, Some(remainder)))
    }

    /// Builds the envelope for `message`.
    ///
    /// Message headers are copied first and `overrides` are applied on top. The
    /// type header is always stamped last. Any binary attachment is moved out of
    /// the message into the envelope body.
    pub fn encode<M: BasicMessage + ?Sized>(
        &self,
        message: &mut M,
        overrides: Option<&HashMap<String, String>>,
    ) -> Result<WireMessage> {
        let json = message.to_json()?;

        let mut properties = message.headers().clone();
        if let Some(overrides) = overrides {
            properties.extend(
                overrides
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
        }
        properties.insert(
            HEADER_BASIC_MESSAGE_CLASS.to_string(),
            message.message_type().to_string(),
        );

        let body = match message.base_mut().take_binary_data() {
            Some(binary_data) => {
                WireBody::Bytes(Box::new(BinaryData::new(json.into_bytes(), binary_data)))
            }
            None => WireBody::Text(json),
        };

        Ok(WireMessage {
            message_id: None,
            correlation_id: message.correlation_id().cloned(),
            reply_to: message.reply_to().cloned(),
            properties,
            body,
        })
    }

    /// Decodes into a statically known type.
    ///
    /// An envelope without a type header is decoded as `T`; one tagged with a
    /// different type fails with [`BusError::TypeMismatch`].
    pub fn decode<T: Message>(&self, wire: WireMessage) -> Result<T> {
        let WireMessage {
            message_id,
            correlation_id,
            reply_to,
            mut properties,
            body,
        } = wire;

        if let Some(tag) = properties.remove(HEADER_BASIC_MESSAGE_CLASS) {
            let resolved = self.resolve_tag(&tag);
            if resolved != T::MESSAGE_TYPE {
                return Err(BusError::TypeMismatch {
                    expected: T::MESSAGE_TYPE.to_string(),
                    actual: tag,
                });
            }
        }

        let (mut message, binary_data) = read_body(
            body,
            |text| serde_json::from_str::<T>(text),
            |reader| parse_head::<T>(reader),
        )?;
        apply_envelope(
            message.message_base_mut(),
            message_id,
            correlation_id,
            reply_to,
            properties,
            binary_data,
        );
        Ok(message)
    }

    /// Decodes into whatever registered type the envelope's type header names.
    pub fn decode_any(&self, wire: WireMessage) -> Result<Box<dyn BasicMessage>> {
        let WireMessage {
            message_id,
            correlation_id,
            reply_to,
            mut properties,
            body,
        } = wire;

        let tag = properties
            .remove(HEADER_BASIC_MESSAGE_CLASS)
            .ok_or(BusError::MissingTypeHeader)?;
        let decoder = match self.decoders.get(self.resolve_tag(&tag)) {
            Some(decoder) => *decoder,
            None => {
                debug!(
                    event = events::DECODE_UNKNOWN_TYPE,
                    component = COMPONENT,
                    msg_type = %tag,
                    msg_id = %fields::format_optional_id(message_id.as_ref()),
                    "no decoder registered for message type"
                );
                return Err(BusError::UnknownType(tag));
            }
        };

        let (mut message, binary_data) =
            read_body(body, decoder.from_text, decoder.from_stream)?;
        apply_envelope(
            message.base_mut(),
            message_id,
            correlation_id,
            reply_to,
            properties,
            binary_data,
        );
        Ok(message)
    }
}

/// Types a listener can ask the bus to decode deliveries into.
pub trait Decodable: Sized + Send + 'static {
    fn decode_from(serializer: &MessageSerializer, wire: WireMessage) -> Result<Self>;

    fn decoded_base(&self) -> &MessageBase;
}

impl<T: Message> Decodable for T {
    fn decode_from(serializer: &MessageSerializer, wire: WireMessage) -> Result<Self> {
        serializer.decode::<T>(wire)
    }

    fn decoded_base(&self) -> &MessageBase {
        self.message_base()
    }
}

impl Decodable for Box<dyn BasicMessage> {
    fn decode_from(serializer: &MessageSerializer, wire: WireMessage) -> Result<Self> {
        serializer.decode_any(wire)
    }

    fn decoded_base(&self) -> &MessageBase {
        self.base()
    }
}
