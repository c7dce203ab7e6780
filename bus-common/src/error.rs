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

//! Error taxonomy shared by every layer of the bus.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failures surfaced by the envelope codec, contexts, processor and bus.
#[derive(Debug)]
pub enum BusError {
    /// A required argument was missing or malformed.
    InvalidArgument(String),
    /// A message identifier was built from an empty string.
    InvalidIdentifier,
    /// A message could not be turned into JSON.
    Encode(serde_json::Error),
    /// An envelope body could not be parsed back into a message.
    Decode(serde_json::Error),
    /// The type header names a type nobody registered.
    UnknownType(String),
    /// A polymorphic decode found no type header on the envelope.
    MissingTypeHeader,
    /// A typed decode found a type header naming a different type.
    TypeMismatch { expected: String, actual: String },
    /// The transport connection refused to start.
    ConnectionStart(String),
    /// Any other failure reported by the transport.
    Transport(String),
    /// A context or component was used outside its contract.
    IllegalState(String),
    Io(std::io::Error),
    Config(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

impl Display for BusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
            BusError::InvalidIdentifier => write!(f, "message id must not be empty"),
            BusError::Encode(err) => write!(f, "failed to encode message: {err}"),
            BusError::Decode(err) => write!(f, "failed to decode message: {err}"),
            BusError::UnknownType(tag) => write!(f, "unknown message type [{tag}]"),
            BusError::MissingTypeHeader => write!(f, "message carries no type header"),
            BusError::TypeMismatch { expected, actual } => {
                write!(f, "expected message type [{expected}] but received [{actual}]")
            }
            BusError::ConnectionStart(reason) => {
                write!(f, "failed to start connection: {reason}")
            }
            BusError::Transport(reason) => write!(f, "transport failure: {reason}"),
            BusError::IllegalState(reason) => write!(f, "illegal state: {reason}"),
            BusError::Io(err) => write!(f, "i/o failure: {err}"),
            BusError::Config(reason) => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl Error for BusError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BusError::Encode(err) | BusError::Decode(err) => Some(err),
            BusError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Io(err)
    }
}

impl From<BusError> for std::io::Error {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Io(inner) => inner,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BusError;
    use std::error::Error;

    #[test]
    fn type_mismatch_names_both_types() {
        let err = BusError::TypeMismatch {
            expected: "SimpleBasicMessage".to_string(),
            actual: "ObjectMessage".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "expected message type [SimpleBasicMessage] but received [ObjectMessage]"
        );
        assert!(err.source().is_none());
    }

    #[test]
    fn io_error_round_trips_without_wrapping() {
        let original = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let bus_err: BusError = original.into();
        assert!(bus_err.source().is_some());

        let back: std::io::Error = bus_err.into();
        assert_eq!(back.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn non_io_error_becomes_other_kind() {
        let err: std::io::Error = BusError::Transport("session closed".to_string()).into();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
        assert!(err.to_string().contains("session closed"));
    }
}
