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

mod support;

use bus_common::{BusError, Endpoint, SimpleBasicMessage};
use embedded_broker::EmbeddedBroker;
use std::collections::HashMap;
use support::{collector, make_bus, next_within, DELIVERY_TIMEOUT, SILENCE};

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_listener_receives_nothing_more() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);
    let queue = Endpoint::queue("lifecycle.orders");

    let (listener, mut received) = collector::<SimpleBasicMessage>();
    let registration = bus
        .register_named("orders", &queue, listener, None)
        .await
        .expect("register");
    assert!(registration.is_active());
    assert_eq!(registration.key().listener_name(), "orders");

    bus.send(&queue, &mut SimpleBasicMessage::new("before"), None)
        .await
        .expect("send");
    let first = next_within(&mut received, DELIVERY_TIMEOUT)
        .await
        .expect("delivered while registered");
    assert_eq!(first.message(), "before");

    bus.cancel(&registration).await;
    registration.cancel().await;
    assert!(!registration.is_active());
    assert_eq!(bus.registration_count(), 0);

    bus.send(&queue, &mut SimpleBasicMessage::new("after"), None)
        .await
        .expect("send");
    assert!(next_within(&mut received, SILENCE).await.is_none());
    assert_eq!(broker.queue_depth("lifecycle.orders"), 1);

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_cancelled_name_can_be_registered_again() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);
    let queue = Endpoint::queue("lifecycle.reuse");

    let (first, _first_rx) = collector::<SimpleBasicMessage>();
    let registration = bus
        .register_named("worker", &queue, first, Some("kind = 'a'"))
        .await
        .expect("register");

    let (duplicate, _duplicate_rx) = collector::<SimpleBasicMessage>();
    let err = bus
        .register_named("worker", &queue, duplicate, Some("kind = 'a'"))
        .await
        .expect_err("same name, destination and selector");
    assert!(matches!(err, BusError::InvalidArgument(_)));

    let (other_selector, _other_rx) = collector::<SimpleBasicMessage>();
    bus.register_named("worker", &queue, other_selector, Some("kind = 'b'"))
        .await
        .expect("a different selector is a different registration");
    assert_eq!(bus.registration_count(), 2);

    registration.cancel().await;
    let (again, mut again_rx) = collector::<SimpleBasicMessage>();
    bus.register_named("worker", &queue, again, Some("kind = 'a'"))
        .await
        .expect("re-register after cancel");

    let headers: HashMap<String, String> = [("kind".to_string(), "a".to_string())].into();
    bus.send(&queue, &mut SimpleBasicMessage::new("hello"), Some(&headers))
        .await
        .expect("send");
    let delivered = next_within(&mut again_rx, DELIVERY_TIMEOUT)
        .await
        .expect("new listener receives");
    assert_eq!(delivered.message(), "hello");

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_selector_leaves_no_registration() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);

    let (listener, _rx) = collector::<SimpleBasicMessage>();
    let err = bus
        .register(&Endpoint::topic("lifecycle.bad"), listener, Some("x = "))
        .await
        .expect_err("malformed selector");
    assert!(matches!(err, BusError::InvalidArgument(_)));
    assert_eq!(bus.registration_count(), 0);
    assert_eq!(broker.topic_subscribers("lifecycle.bad"), 0);

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_cancels_every_registration() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);
    let topic = Endpoint::topic("lifecycle.events");

    let mut registrations = Vec::new();
    for _ in 0..3 {
        let (listener, _rx) = collector::<SimpleBasicMessage>();
        registrations.push(
            bus.register(&topic, listener, None)
                .await
                .expect("register"),
        );
    }
    assert_eq!(broker.topic_subscribers("lifecycle.events"), 3);

    bus.shutdown().await;

    assert_eq!(bus.registration_count(), 0);
    assert_eq!(broker.topic_subscribers("lifecycle.events"), 0);
    assert!(registrations.iter().all(|registration| !registration.is_active()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_release_each_subscription_once() {
    support::init_logging();
    let broker = EmbeddedBroker::new();
    let bus = make_bus(&broker);
    let topic = Endpoint::topic("lifecycle.racing");

    let mut registrations = Vec::new();
    for _ in 0..10 {
        let (listener, _rx) = collector::<SimpleBasicMessage>();
        registrations.push(
            bus.register(&topic, listener, None)
                .await
                .expect("register"),
        );
    }
    assert_eq!(broker.topic_subscribers("lifecycle.racing"), 10);

    let mut cancels = Vec::new();
    for registration in &registrations {
        for _ in 0..4 {
            let registration = registration.clone();
            cancels.push(tokio::spawn(async move { registration.cancel().await }));
        }
    }
    for cancel in cancels {
        cancel.await.expect("cancel task");
    }

    assert_eq!(bus.registration_count(), 0);
    assert_eq!(broker.topic_subscribers("lifecycle.racing"), 0);
    assert!(registrations.iter().all(|registration| !registration.is_active()));

    bus.shutdown().await;
}
