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

use bus_common::{BusConfig, BusError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_count() -> u32 {
    3
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub(crate) bus: BusConfig,
    /// Where greetings are published, as `queue://name` or `topic://name`.
    pub(crate) endpoint: String,
    pub(crate) service_endpoint: String,
    pub(crate) message: String,
    #[serde(default = "default_count")]
    pub(crate) count: u32,
}

impl Config {
    pub(crate) fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| {
            BusError::Config(format!("unable to read {}: {err}", path.display()))
        })?;
        json5::from_str(&contents).map_err(|err| {
            BusError::Config(format!("unable to parse {}: {err}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn bundled_config_parses() {
        let config = Config::from_file(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/config/sample-client.json5"
        ))
        .expect("bundled config");
        assert_eq!(config.endpoint, "topic://sample.greetings");
        assert!(config.count > 0);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = json5::from_str::<Config>(
            r#"{ endpoint: "queue://a", service_endpoint: "queue://b", message: "m", colour: "blue" }"#,
        )
        .expect_err("unknown field");
        assert!(err.to_string().contains("colour"));
    }
}
