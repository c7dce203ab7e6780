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

//! Listener registrations and the table that owns their resources.

use crate::context::ConsumerConnectionContext;
use crate::error::{BusError, Result};
use crate::observability::{events, fields};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info, warn};

const COMPONENT: &str = "registration";

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
/// Structural identity of one listener attachment.
pub struct RegistrationKey {
    destination_name: String,
    listener_name: String,
    selector: Option<String>,
}

impl RegistrationKey {
    pub fn new(
        destination_name: impl Into<String>,
        listener_name: impl Into<String>,
        selector: Option<&str>,
    ) -> Self {
        Self {
            destination_name: destination_name.into(),
            listener_name: listener_name.into(),
            selector: selector
                .filter(|selector| !selector.trim().is_empty())
                .map(str::to_string),
        }
    }

    pub fn destination_name(&self) -> &str {
        &self.destination_name
    }

    pub fn listener_name(&self) -> &str {
        &self.listener_name
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }
}

impl Display for RegistrationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Registration[destination={}, listener={}, selector={}]",
            self.destination_name,
            self.listener_name,
            fields::format_selector(self.selector.as_deref())
        )
    }
}

/// Resources backing one active registration.
struct RegistrationData {
    context: ConsumerConnectionContext,
}

/// Concurrent map of active registrations.
///
/// Registering and canceling may race from any task; removal is what decides
/// which caller tears the resources down.
#[derive(Default)]
pub(crate) struct RegistrationTable {
    entries: DashMap<RegistrationKey, RegistrationData>,
}

impl RegistrationTable {
    /// Stores `context` under `key`. Fails without touching the table when
    /// the key is already taken; the caller still owns `context` then.
    pub(crate) fn insert(
        &self,
        key: RegistrationKey,
        context: ConsumerConnectionContext,
    ) -> std::result::Result<(), (BusError, ConsumerConnectionContext)> {
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => Err((
                BusError::InvalidArgument(format!("{} is already registered", occupied.key())),
                context,
            )),
            Entry::Vacant(vacant) => {
                vacant.insert(RegistrationData { context });
                Ok(())
            }
        }
    }

    pub(crate) fn contains(&self, key: &RegistrationKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn keys(&self) -> Vec<RegistrationKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Removes `key` and releases its resources. Returns `false` when nothing
    /// was registered under it.
    ///
    /// The listener is detached before the consumer closes, and the consumer
    /// closes before its context. Failures are logged and do not stop the
    /// remaining steps.
    pub(crate) async fn cancel(&self, key: &RegistrationKey) -> bool {
        let Some((key, data)) = self.entries.remove(key) else {
            debug!(
                event = events::REGISTRATION_CANCEL_NOOP,
                component = COMPONENT,
                registration = %key,
                "registration already canceled"
            );
            return false;
        };

        let consumer = data.context.consumer();
        if let Err(err) = consumer.set_message_listener(None).await {
            log_teardown_failure(&key, "detach_listener", &err);
        }
        if let Err(err) = consumer.close().await {
            log_teardown_failure(&key, "close_consumer", &err);
        }
        if let Err(err) = data.context.context().close().await {
            log_teardown_failure(&key, "close_context", &err);
        }

        info!(
            event = events::REGISTRATION_CANCEL_OK,
            component = COMPONENT,
            registration = %key,
            "registration canceled"
        );
        true
    }
}

fn log_teardown_failure(key: &RegistrationKey, step: &'static str, err: &dyn Display) {
    warn!(
        event = events::REGISTRATION_TEARDOWN_FAILED,
        component = COMPONENT,
        registration = %key,
        step,
        err = %err,
        "registration teardown step failed"
    );
}

/// Handle to an active listener. Cancel it to stop deliveries.
///
/// Equality and hashing follow the key only.
#[derive(Clone)]
pub struct Registration {
    key: RegistrationKey,
    table: Arc<RegistrationTable>,
}

impl Registration {
    pub(crate) fn new(key: RegistrationKey, table: Arc<RegistrationTable>) -> Self {
        Self { key, table }
    }

    pub fn key(&self) -> &RegistrationKey {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.table.contains(&self.key)
    }

    /// Stops deliveries and releases the listener's resources.
    ///
    /// Canceling more than once, or from several tasks, is a no-op after the first.
    pub async fn cancel(&self) {
        self.table.cancel(&self.key).await;
    }
}

impl PartialEq for Registration {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Registration {}

impl Hash for Registration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl Debug for Registration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Display for Registration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.key, f)
    }
}

/// Stores a freshly attached consumer, closing it again when the key is taken.
pub(crate) async fn admit(
    table: &Arc<RegistrationTable>,
    key: RegistrationKey,
    context: ConsumerConnectionContext,
) -> Result<Registration> {
    match table.insert(key.clone(), context) {
        Ok(()) => {
            info!(
                event = events::REGISTRATION_ADD_OK,
                component = COMPONENT,
                registration = %key,
                "listener registered"
            );
            Ok(Registration::new(key, table.clone()))
        }
        Err((err, context)) => {
            warn!(
                event = events::REGISTRATION_ADD_FAILED,
                component = COMPONENT,
                registration = %key,
                err = %err,
                "registration rejected"
            );
            if let Err(close_err) = context.close().await {
                log_teardown_failure(&key, "close_rejected", &close_err);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{admit, RegistrationKey, RegistrationTable};
    use crate::context::tests::{CloseLog, NoopConnection};
    use crate::context::{ConnectionContext, ConsumerConnectionContext};
    use crate::endpoint::EndpointType;
    use crate::error::BusError;
    use crate::transport::{Connection, Destination};
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn consumer_context(log: Arc<CloseLog>) -> ConsumerConnectionContext {
        let connection: Arc<dyn Connection> = Arc::new(NoopConnection::new(log));
        let session = connection.create_session().await.expect("session");
        let destination = Destination::new(EndpointType::Queue, "orders", false);
        let consumer = session
            .create_consumer(&destination, None)
            .await
            .expect("consumer");
        ConsumerConnectionContext::new(
            ConnectionContext::new(connection, session, destination, true),
            consumer,
        )
    }

    #[test]
    fn keys_compare_structurally_and_ignore_blank_selectors() {
        let a = RegistrationKey::new("orders", "audit", Some("x = '1'"));
        let b = RegistrationKey::new("orders", "audit", Some("x = '1'"));
        let c = RegistrationKey::new("orders", "audit", Some("x = '2'"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            RegistrationKey::new("orders", "audit", Some("  ")),
            RegistrationKey::new("orders", "audit", None)
        );

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn key_display_names_all_parts() {
        let key = RegistrationKey::new("orders", "audit", None);
        assert_eq!(
            key.to_string(),
            "Registration[destination=orders, listener=audit, selector=none]"
        );
    }

    #[tokio::test]
    async fn cancel_tears_down_once() {
        let log = Arc::new(CloseLog::default());
        let table = Arc::new(RegistrationTable::default());
        let key = RegistrationKey::new("orders", "audit", None);

        let registration = admit(&table, key, consumer_context(log.clone()).await)
            .await
            .expect("admit");
        assert!(registration.is_active());
        assert_eq!(table.len(), 1);

        registration.cancel().await;
        registration.cancel().await;

        assert!(!registration.is_active());
        assert_eq!(table.len(), 0);
        assert_eq!(log.calls(), vec!["session", "connection"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_cancels_tear_down_once() {
        let log = Arc::new(CloseLog::default());
        let table = Arc::new(RegistrationTable::default());
        let registration = admit(
            &table,
            RegistrationKey::new("orders", "audit", None),
            consumer_context(log.clone()).await,
        )
        .await
        .expect("admit");

        let cancels: Vec<_> = (0..8)
            .map(|_| {
                let registration = registration.clone();
                tokio::spawn(async move { registration.cancel().await })
            })
            .collect();
        for cancel in cancels {
            cancel.await.expect("cancel task");
        }

        assert!(!registration.is_active());
        assert_eq!(table.len(), 0);
        assert_eq!(log.calls(), vec!["session", "connection"]);
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected_and_its_context_released() {
        let first_log = Arc::new(CloseLog::default());
        let second_log = Arc::new(CloseLog::default());
        let table = Arc::new(RegistrationTable::default());
        let key = RegistrationKey::new("orders", "audit", None);

        let first = admit(&table, key.clone(), consumer_context(first_log.clone()).await)
            .await
            .expect("first admit");
        let err = admit(&table, key, consumer_context(second_log.clone()).await)
            .await
            .expect_err("duplicate must fail");

        assert!(matches!(err, BusError::InvalidArgument(_)));
        assert_eq!(table.len(), 1);
        assert!(first_log.calls().is_empty());
        assert_eq!(second_log.calls(), vec!["session", "connection"]);
        assert!(first.is_active());
    }

    #[tokio::test]
    async fn teardown_continues_past_failures() {
        let log = Arc::new(CloseLog {
            fail_session: true,
            ..CloseLog::default()
        });
        let table = Arc::new(RegistrationTable::default());
        let registration = admit(
            &table,
            RegistrationKey::new("orders", "audit", None),
            consumer_context(log.clone()).await,
        )
        .await
        .expect("admit");

        registration.cancel().await;
        assert_eq!(log.calls(), vec!["session", "connection"]);
        assert!(!registration.is_active());
    }
}
