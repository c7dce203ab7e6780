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

//! In-process message broker implementing the `bus-common` transport traits.
//!
//! Queues hand each message to one consumer, topics copy it to every
//! subscriber, and temporary destinations live as long as the connection that
//! created them. Selectors are evaluated against string message properties.

mod broker;
mod connection;
pub mod selector;
mod store;

pub use broker::EmbeddedBroker;
pub use connection::BrokerConnection;
pub use selector::Selector;
