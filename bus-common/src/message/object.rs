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

use crate::error::{BusError, Result};
use crate::message::{Message, MessageBase};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Carries an arbitrary serde value as a JSON string in its `message` field.
///
/// The receiving side picks the concrete type when it calls [`ObjectMessage::to_object`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ObjectMessage {
    #[serde(skip)]
    base: MessageBase,
    message: Option<String>,
}

impl ObjectMessage {
    pub fn from_object<T: Serialize>(object: &T) -> Result<Self> {
        let message = serde_json::to_string(object).map_err(BusError::Encode)?;
        Ok(Self {
            base: MessageBase::default(),
            message: Some(message),
        })
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn to_object<T: DeserializeOwned>(&self) -> Result<T> {
        let json = self.message.as_deref().ok_or_else(|| {
            BusError::IllegalState("object message carries no JSON data".to_string())
        })?;
        serde_json::from_str(json).map_err(BusError::Decode)
    }
}

impl Message for ObjectMessage {
    const MESSAGE_TYPE: &'static str = "org.hawkular.bus.common.ObjectMessage";

    fn message_base(&self) -> &MessageBase {
        &self.base
    }

    fn message_base_mut(&mut self) -> &mut MessageBase {
        &mut self.base
    }
}
