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

mod config;
mod listeners;

use crate::config::Config;
use crate::listeners::{GreetingPrinter, Shouter};
use bus_common::{Bus, BusError, Endpoint, Result, RpcListener, SimpleBasicMessage};
use clap::Parser;
use embedded_broker::EmbeddedBroker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const DELIVERY_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(about = "Publishes greetings and makes one request through an in-process broker")]
struct SampleArgs {
    #[arg(short, long, value_name = "FILE")]
    config: String,
    /// Overrides the number of greetings from the config file.
    #[arg(short = 'n', long)]
    count: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let args = SampleArgs::parse();
    let mut config = Config::from_file(&args.config)?;
    if let Some(count) = args.count {
        config.count = count;
    }
    info!(config = %args.config, count = config.count, "Started bus-sample-client");

    let broker = EmbeddedBroker::new();
    let bus = Bus::new(Arc::new(broker.clone()), config.bus.clone());

    let outcome = run(&bus, &config).await;
    bus.shutdown().await;
    outcome
}

async fn run(bus: &Bus, config: &Config) -> Result<()> {
    let topic: Endpoint = config.endpoint.parse()?;
    let service: Endpoint = config.service_endpoint.parse()?;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let printer = Arc::new(GreetingPrinter { seen: seen_tx });
    let printer = bus
        .register_named("greeting-printer", &topic, printer, None)
        .await?;
    bus.register_named("shouter", &service, Arc::new(RpcListener::new(Shouter)), None)
        .await?;
    info!(registrations = bus.registration_count(), "listeners registered");

    for sequence in 1..=config.count {
        let mut greeting = SimpleBasicMessage::new(format!("{} #{sequence}", config.message));
        let headers = HashMap::from([("sequence".to_string(), sequence.to_string())]);
        let msg_id = bus.send(&topic, &mut greeting, Some(&headers)).await?;
        info!(%msg_id, sequence, "greeting published");
    }

    for _ in 0..config.count {
        match tokio::time::timeout(DELIVERY_WAIT, seen_rx.recv()).await {
            Ok(Some(_)) => {}
            _ => {
                warn!(registration = %printer, "greeting not delivered in time");
                return Err(BusError::IllegalState(
                    "greetings were not all delivered".to_string(),
                ));
            }
        }
    }

    let mut request = SimpleBasicMessage::new(config.message.as_str());
    let reply: Option<SimpleBasicMessage> = bus
        .send_and_receive(&service, &mut request, config.bus.rpc_timeout())
        .await?;
    match reply {
        Some(reply) => info!(reply = reply.message(), "response received"),
        None => warn!(
            timeout_ms = config.bus.rpc_timeout_ms,
            "no response before timeout"
        ),
    }

    Ok(())
}
