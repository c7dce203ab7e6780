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

use super::{ConnectionContext, ConsumerConnectionContext, ProducerConnectionContext};
use crate::endpoint::{Endpoint, EndpointType};
use crate::error::{BusError, Result};
use crate::observability::events;
use crate::transport::{Connection, ConnectionFactory, Destination, Session};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const COMPONENT: &str = "connection_context_factory";

/// How a [`ConnectionContextFactory`] hands out connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStrategy {
    /// One connection, created on first use and shared until the factory is closed.
    Shared,
    /// A fresh connection per context, closed with the context.
    PerContext,
}

impl ConnectionStrategy {
    fn as_str(&self) -> &'static str {
        match self {
            ConnectionStrategy::Shared => "shared",
            ConnectionStrategy::PerContext => "per_context",
        }
    }
}

enum ConnectionSource {
    Shared(Mutex<Option<Arc<dyn Connection>>>),
    PerContext,
}

/// Resolves `endpoint` on `session`, creating temporary destinations as needed.
pub(crate) async fn resolve_destination(
    session: &dyn Session,
    endpoint: &Endpoint,
) -> Result<Destination> {
    if endpoint.is_temporary() {
        return match endpoint.kind() {
            EndpointType::Queue => session.create_temporary_queue().await,
            EndpointType::Topic => session.create_temporary_topic().await,
        };
    }

    let name = endpoint.destination_name();
    if name.is_empty() {
        return Err(BusError::InvalidArgument(format!(
            "endpoint {endpoint} does not name a destination"
        )));
    }

    match endpoint.kind() {
        EndpointType::Queue => session.create_queue(name).await,
        EndpointType::Topic => session.create_topic(name).await,
    }
}

/// Builds producer and consumer contexts over a [`ConnectionFactory`].
pub struct ConnectionContextFactory {
    connection_factory: Arc<dyn ConnectionFactory>,
    source: ConnectionSource,
}

impl ConnectionContextFactory {
    pub fn new(
        connection_factory: Arc<dyn ConnectionFactory>,
        strategy: ConnectionStrategy,
    ) -> Self {
        let source = match strategy {
            ConnectionStrategy::Shared => ConnectionSource::Shared(Mutex::new(None)),
            ConnectionStrategy::PerContext => ConnectionSource::PerContext,
        };
        debug!(
            component = COMPONENT,
            strategy = strategy.as_str(),
            "connection context factory created"
        );
        Self {
            connection_factory,
            source,
        }
    }

    pub fn shared(connection_factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::new(connection_factory, ConnectionStrategy::Shared)
    }

    pub fn per_context(connection_factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::new(connection_factory, ConnectionStrategy::PerContext)
    }

    pub fn strategy(&self) -> ConnectionStrategy {
        match self.source {
            ConnectionSource::Shared(_) => ConnectionStrategy::Shared,
            ConnectionSource::PerContext => ConnectionStrategy::PerContext,
        }
    }

    pub async fn create_producer_context(
        &self,
        endpoint: &Endpoint,
    ) -> Result<ProducerConnectionContext> {
        let context = self.open_context(endpoint).await?;
        match context.session().create_producer(context.destination()).await {
            Ok(producer) => Ok(ProducerConnectionContext::new(context, producer)),
            Err(err) => {
                discard(&context, &err).await;
                Err(err)
            }
        }
    }

    /// A `None` or empty selector consumes every message.
    pub async fn create_consumer_context(
        &self,
        endpoint: &Endpoint,
        selector: Option<&str>,
    ) -> Result<ConsumerConnectionContext> {
        let context = self.open_context(endpoint).await?;
        attach_consumer(context, selector).await
    }

    /// Releases the cached shared connection, if any.
    pub async fn close(&self) {
        let ConnectionSource::Shared(cached) = &self.source else {
            return;
        };

        if let Some(connection) = cached.lock().await.take() {
            close_connection(connection.as_ref(), "factory_close").await;
        }
    }

    async fn open_context(&self, endpoint: &Endpoint) -> Result<ConnectionContext> {
        let (connection, owns_connection) = self.obtain_connection().await?;

        let session = match connection.create_session().await {
            Ok(session) => session,
            Err(err) => {
                if owns_connection {
                    close_connection(connection.as_ref(), "session_create_failed").await;
                }
                return Err(err);
            }
        };

        let destination = match resolve_destination(session.as_ref(), endpoint).await {
            Ok(destination) => destination,
            Err(err) => {
                if let Err(close_err) = session.close().await {
                    debug!(
                        event = events::SESSION_CLOSE_FAILED,
                        component = COMPONENT,
                        err = %close_err,
                        "unable to close session after destination failure"
                    );
                }
                if owns_connection {
                    close_connection(connection.as_ref(), "destination_failed").await;
                }
                return Err(err);
            }
        };

        Ok(ConnectionContext::new(
            connection,
            session,
            destination,
            owns_connection,
        ))
    }

    /// Returns a started connection and whether the caller owns it.
    async fn obtain_connection(&self) -> Result<(Arc<dyn Connection>, bool)> {
        match &self.source {
            ConnectionSource::PerContext => {
                let connection = self.connection_factory.create_connection().await?;
                debug!(
                    event = events::CONNECTION_CREATE,
                    component = COMPONENT,
                    strategy = ConnectionStrategy::PerContext.as_str(),
                    "connection created"
                );
                if let Err(err) = connection.start().await {
                    warn!(
                        event = events::CONNECTION_START_FAILED,
                        component = COMPONENT,
                        err = %err,
                        "failed to start connection"
                    );
                    close_connection(connection.as_ref(), "start_failed").await;
                    return Err(BusError::ConnectionStart(err.to_string()));
                }
                Ok((connection, true))
            }
            ConnectionSource::Shared(cached) => {
                let mut cached = cached.lock().await;
                let connection = match cached.as_ref() {
                    Some(connection) => {
                        debug!(
                            event = events::CONNECTION_REUSE,
                            component = COMPONENT,
                            "reusing cached connection"
                        );
                        connection.clone()
                    }
                    None => {
                        let connection = self.connection_factory.create_connection().await?;
                        debug!(
                            event = events::CONNECTION_CREATE,
                            component = COMPONENT,
                            strategy = ConnectionStrategy::Shared.as_str(),
                            "connection created"
                        );
                        *cached = Some(connection.clone());
                        connection
                    }
                };

                // Starting a started connection is a no-op; a failure invalidates the cache.
                if let Err(err) = connection.start().await {
                    warn!(
                        event = events::CONNECTION_START_FAILED,
                        component = COMPONENT,
                        err = %err,
                        "failed to start connection"
                    );
                    if let Some(stale) = cached.take() {
                        close_connection(stale.as_ref(), "start_failed").await;
                    }
                    return Err(BusError::ConnectionStart(err.to_string()));
                }
                Ok((connection, false))
            }
        }
    }
}

async fn attach_consumer(
    context: ConnectionContext,
    selector: Option<&str>,
) -> Result<ConsumerConnectionContext> {
    let selector = selector.filter(|selector| !selector.trim().is_empty());
    match context
        .session()
        .create_consumer(context.destination(), selector)
        .await
    {
        Ok(consumer) => Ok(ConsumerConnectionContext::new(context, consumer)),
        Err(err) => {
            discard(&context, &err).await;
            Err(err)
        }
    }
}

async fn discard(context: &ConnectionContext, reason: &BusError) {
    warn!(
        event = events::CONTEXT_CREATE_FAILED,
        component = COMPONENT,
        destination = %context.destination(),
        err = %reason,
        "context creation failed; releasing partial resources"
    );
    if let Err(err) = context.close().await {
        debug!(
            event = events::CONTEXT_CLOSE_FAILED,
            component = COMPONENT,
            destination = %context.destination(),
            err = %err,
            "unable to release partial context"
        );
    }
}

async fn close_connection(connection: &dyn Connection, reason: &'static str) {
    if let Err(err) = connection.close().await {
        warn!(
            event = events::CONNECTION_CLOSE_FAILED,
            component = COMPONENT,
            reason,
            err = %err,
            "unable to close connection; resources may leak"
        );
    } else {
        debug!(
            event = events::CONNECTION_RELEASE,
            component = COMPONENT,
            reason,
            "connection closed"
        );
    }
}
