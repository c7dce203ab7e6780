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

use crate::message::{Message, MessageBase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A plain text message with optional string details.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SimpleBasicMessage {
    #[serde(skip)]
    base: MessageBase,
    message: String,
    #[serde(default)]
    details: Option<HashMap<String, String>>,
}

impl SimpleBasicMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            base: MessageBase::default(),
            message: message.into(),
            details: None,
        }
    }

    /// Builds a message with its own copy of `details`; an empty map is stored as no details.
    pub fn with_details(message: impl Into<String>, details: &HashMap<String, String>) -> Self {
        Self {
            base: MessageBase::default(),
            message: message.into(),
            details: (!details.is_empty()).then(|| details.clone()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&HashMap<String, String>> {
        self.details.as_ref()
    }
}

impl Message for SimpleBasicMessage {
    const MESSAGE_TYPE: &'static str = "org.hawkular.bus.common.SimpleBasicMessage";

    fn message_base(&self) -> &MessageBase {
        &self.base
    }

    fn message_base_mut(&mut self) -> &mut MessageBase {
        &mut self.base
    }
}
