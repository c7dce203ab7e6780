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

//! Logical queue/topic addresses.

use crate::error::{BusError, Result};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointType {
    Queue,
    Topic,
}

impl EndpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointType::Queue => "QUEUE",
            EndpointType::Topic => "TOPIC",
        }
    }
}

/// A queue or topic, either named or temporary.
///
/// Named endpoints can be written as `queue://name` or `topic://name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    kind: EndpointType,
    name: Cow<'static, str>,
    temporary: bool,
}

impl Endpoint {
    pub const TEMPORARY_QUEUE: Endpoint = Endpoint {
        kind: EndpointType::Queue,
        name: Cow::Borrowed("__tmpQueue__"),
        temporary: true,
    };

    pub const TEMPORARY_TOPIC: Endpoint = Endpoint {
        kind: EndpointType::Topic,
        name: Cow::Borrowed("__tmpTopic__"),
        temporary: true,
    };

    pub fn new(kind: EndpointType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: Cow::Owned(name.into()),
            temporary: false,
        }
    }

    pub fn queue(name: impl Into<String>) -> Self {
        Self::new(EndpointType::Queue, name)
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(EndpointType::Topic, name)
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

    /// Name handed to the transport: only the last `/` segment of the logical name.
    pub fn destination_name(&self) -> &str {
        match self.name.rfind('/') {
            Some(idx) => &self.name[idx + 1..],
            None => &self.name,
        }
    }
}

impl FromStr for Endpoint {
    type Err = BusError;

    fn from_str(destination: &str) -> Result<Self> {
        let invalid = || {
            BusError::InvalidArgument(format!("not a valid destination URI: {destination}"))
        };

        let (scheme, rest) = destination.split_once("://").ok_or_else(invalid)?;
        let kind = if scheme.eq_ignore_ascii_case("queue") {
            EndpointType::Queue
        } else if scheme.eq_ignore_ascii_case("topic") {
            EndpointType::Topic
        } else {
            return Err(BusError::InvalidArgument(format!(
                "not a valid destination URI [{destination}]; the endpoint type must be either QUEUE or TOPIC: {}",
                scheme.to_ascii_uppercase()
            )));
        };

        let name = rest
            .split(|c| c == '/' || c == '?' || c == '#')
            .next()
            .unwrap_or_default();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Endpoint::new(kind, name))
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.temporary {
            write!(f, "{{{}}}$TEMPORARY$", self.kind.as_str())
        } else {
            write!(f, "{{{}}}{}", self.kind.as_str(), self.name)
        }
    }
}
