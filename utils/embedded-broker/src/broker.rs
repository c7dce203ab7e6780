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

use crate::connection::BrokerConnection;
use crate::store::BrokerState;
use async_trait::async_trait;
use bus_common::transport::{Connection, ConnectionFactory};
use bus_common::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

const COMPONENT: &str = "embedded_broker";

/// An in-process broker. Clones share the same destinations.
#[derive(Clone, Default)]
pub struct EmbeddedBroker {
    state: Arc<BrokerState>,
    refused_starts: Arc<AtomicUsize>,
}

impl EmbeddedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` connections fail when started.
    pub fn refuse_next_starts(&self, count: usize) {
        self.refused_starts.store(count, Ordering::SeqCst);
    }

    /// Messages parked in queue `name` and not yet consumed.
    pub fn queue_depth(&self, name: &str) -> usize {
        self.state.queue_depth(name)
    }

    /// Live subscriptions on topic `name`.
    pub fn topic_subscribers(&self, name: &str) -> usize {
        self.state.topic_subscribers(name)
    }

    /// Temporary queues and topics that have not been deleted yet.
    pub fn temporary_destination_count(&self) -> usize {
        self.state.temporary_count()
    }

    fn take_refusal(&self) -> bool {
        self.refused_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ConnectionFactory for EmbeddedBroker {
    async fn create_connection(&self) -> Result<Arc<dyn Connection>> {
        let refuse_start = self.take_refusal();
        debug!(component = COMPONENT, refuse_start, "connection opened");
        Ok(Arc::new(BrokerConnection::new(self.state.clone(), refuse_start)))
    }
}
