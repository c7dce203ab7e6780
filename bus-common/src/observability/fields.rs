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

//! Shared field values and value-format helpers.

use crate::message_id::MessageId;
use crate::transport::Destination;

pub const NONE: &str = "none";
pub const REASON_NO_REPLY_TO: &str = "no_reply_to";
pub const REASON_NO_RESPONSE: &str = "no_response";
pub const REASON_NO_CONTEXT: &str = "no_consumer_context";

pub fn format_optional_id(id: Option<&MessageId>) -> String {
    id.map(ToString::to_string)
        .unwrap_or_else(|| NONE.to_string())
}

pub fn format_selector(selector: Option<&str>) -> String {
    match selector {
        Some(selector) if !selector.is_empty() => selector.to_string(),
        _ => NONE.to_string(),
    }
}

pub fn format_destination(destination: Option<&Destination>) -> String {
    destination
        .map(ToString::to_string)
        .unwrap_or_else(|| NONE.to_string())
}
