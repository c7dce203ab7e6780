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

use crate::context::ConnectionStrategy;
use crate::error::{BusError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const MIN_RECEIVE_TIMEOUT_MS: u64 = 1;

fn default_reuse_connection() -> bool {
    true
}

fn default_receive_timeout_ms() -> u64 {
    MIN_RECEIVE_TIMEOUT_MS
}

fn default_rpc_timeout_ms() -> u64 {
    5_000
}

/// Settings for a [`Bus`](crate::bus::Bus), usually read from a JSON5 file.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Share one connection across producer contexts instead of opening one per context.
    #[serde(default = "default_reuse_connection")]
    pub reuse_connection: bool,
    #[serde(default = "default_receive_timeout_ms")]
    pub default_receive_timeout_ms: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            reuse_connection: default_reuse_connection(),
            default_receive_timeout_ms: default_receive_timeout_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

impl BusConfig {
    pub fn from_json5_str(contents: &str) -> Result<Self> {
        json5::from_str(contents).map_err(|err| BusError::Config(err.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| {
            BusError::Config(format!("unable to read {}: {err}", path.display()))
        })?;
        Self::from_json5_str(&contents)
    }

    /// Poll timeout used by receives that do not name one. Never below 1 ms.
    pub fn default_receive_timeout(&self) -> Duration {
        Duration::from_millis(self.default_receive_timeout_ms.max(MIN_RECEIVE_TIMEOUT_MS))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn connection_strategy(&self) -> ConnectionStrategy {
        if self.reuse_connection {
            ConnectionStrategy::Shared
        } else {
            ConnectionStrategy::PerContext
        }
    }
}
