// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session lifecycle tests against the simulated server.

use std::sync::Arc;
use std::time::Duration;

use uaql_opcua::{AttributeId, RequestFault, SessionState, SimulatedClient, StatusCode, Variant};
use uaql_tests::prelude::*;

// =============================================================================
// Waiting for a Session
// =============================================================================

#[tokio::test]
async fn test_current_session_waits_for_first_connect() {
    init_test_logging();
    let mut harness = SimHarness::demo();

    let supervisor = Arc::clone(&harness.supervisor);
    let waiter = tokio::spawn(async move { supervisor.current_session().await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());
    assert_eq!(harness.client.stats().connect_attempts, 0);

    harness.start();
    let waited = within(HARNESS_TIMEOUT, waiter).await.unwrap().unwrap();
    let later = harness.session().await;
    assert!(Arc::ptr_eq(&waited, &later));
    assert_eq!(waited.generation(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_connect_fails_three_times_then_succeeds() {
    init_test_logging();
    let client = SimulatedClient::with_demo_address_space();
    client.fail_next_connects(3);
    let mut harness = SimHarness::new(client, ConfigFixtures::fast());

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let supervisor = Arc::clone(&harness.supervisor);
            tokio::spawn(async move { supervisor.current_session().await })
        })
        .collect();

    let mut states = harness.supervisor.watch_state();
    harness.start();

    let mut saw_connecting = false;
    let active = within(HARNESS_TIMEOUT, async {
        loop {
            let state = states.borrow_and_update().clone();
            match state {
                SessionState::Connecting => saw_connecting = true,
                SessionState::Active(session) => return session,
                _ => {}
            }
            states.changed().await.unwrap();
        }
    })
    .await;
    assert!(saw_connecting);

    let stats = harness.supervisor.stats();
    assert_eq!(stats.connect_attempts, 4);
    assert_eq!(stats.connect_failures, 3);
    assert_eq!(stats.sessions_created, 1);
    assert_eq!(harness.client.stats().connect_attempts, 4);

    for waiter in waiters {
        let session = waiter.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&session, &active));
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_failed_session_creation_is_retried() {
    init_test_logging();
    let client = SimulatedClient::with_demo_address_space();
    client.fail_next_sessions(2);
    let harness = SimHarness::new(client, ConfigFixtures::fast()).started();

    let session = harness.session().await;
    assert_eq!(session.generation(), 1);
    assert_eq!(harness.supervisor.stats().connect_failures, 2);
    assert_eq!(harness.client.stats().sessions_created, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_gives_up_after_retries_exhausted() {
    init_test_logging();
    let client = SimulatedClient::with_demo_address_space();
    client.fail_next_connects(10);
    let mut harness = SimHarness::new(client, ConfigFixtures::fast_with_retries(2)).started();

    harness.join().await;
    assert!(harness.supervisor.is_stopped());
    assert_eq!(harness.client.stats().connect_attempts, 3);

    let error = harness.supervisor.current_session().await.unwrap_err();
    assert!(!error.is_session_fatal());

    harness.shutdown().await;
}

// =============================================================================
// Recycling
// =============================================================================

#[tokio::test]
async fn test_stale_fatal_report_does_not_recycle_twice() {
    init_test_logging();
    let harness = SimHarness::demo().started();
    let first = harness.session().await;

    let error = session_closed_error(&Nodes::temperature());
    assert!(harness.supervisor.report_error(&first, &error));
    let second = harness.next_session(first.generation()).await;
    assert_eq!(harness.supervisor.stats().recycles, 1);

    // Late reports against the superseded session.
    assert!(!harness.supervisor.report_error(&first, &error));
    assert!(!harness.supervisor.report_error(&first, &error));

    tokio::time::sleep(Duration::from_millis(30)).await;
    let stats = harness.supervisor.stats();
    assert_eq!(stats.recycles, 1);
    assert_eq!(stats.stale_reports_ignored, 2);
    assert!(harness.supervisor.is_current(&second));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_fatal_reports_recycle_once() {
    init_test_logging();
    let harness = SimHarness::demo().started();
    let first = harness.session().await;

    let error = session_closed_error(&Nodes::pressure());
    let triggered = (0..5)
        .filter(|_| harness.supervisor.report_error(&first, &error))
        .count();
    assert_eq!(triggered, 1);

    let second = harness.next_session(first.generation()).await;
    assert_eq!(second.generation(), first.generation() + 1);
    assert_eq!(harness.supervisor.stats().recycles, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_benign_errors_keep_the_session() {
    init_test_logging();
    let harness = SimHarness::demo().started();
    let first = harness.session().await;

    let error = harness.reader.read_value(&Nodes::missing()).await.unwrap_err();
    assert_eq!(error.status(), Some(StatusCode::BAD_NODE_ID_UNKNOWN));
    assert!(!error.is_session_fatal());

    harness.client.inject_request_fault(RequestFault::Status(StatusCode::BAD_TYPE_MISMATCH));
    assert!(harness.reader.read_value(&Nodes::temperature()).await.is_err());

    assert_eq!(harness.supervisor.stats().recycles, 0);
    assert!(Arc::ptr_eq(&harness.session().await, &first));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_expired_session_fails_one_request_then_recovers() {
    init_test_logging();
    let harness = SimHarness::demo().started();
    let first = harness.session().await;

    harness.client.expire_sessions();
    let error = harness.reader.read_value(&Nodes::temperature()).await.unwrap_err();
    assert_eq!(error.status(), Some(StatusCode::BAD_SESSION_CLOSED));
    assert!(error.is_session_fatal());

    harness.next_session(first.generation()).await;
    let value = harness.reader.read_value(&Nodes::temperature()).await.unwrap();
    assert_eq!(value, Variant::Double(21.5));
    assert_eq!(harness.supervisor.stats().recycles, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_requests_wait_while_disconnected() {
    init_test_logging();
    let harness = SimHarness::demo().started();
    let first = harness.session().await;

    harness.client.fail_next_connects(3);
    harness.client.close_transport("link down");
    let supervisor = Arc::clone(&harness.supervisor);
    let generation = first.generation();
    wait_for_or_panic(
        HARNESS_TIMEOUT,
        move || {
            supervisor
                .try_current_session()
                .map_or(true, |session| session.generation() > generation)
        },
        "closed session to be withdrawn",
    )
    .await;

    // Issued while the supervisor is reconnecting: no error, only latency.
    let value = within(HARNESS_TIMEOUT, harness.reader.read_value(&Nodes::counter()))
        .await
        .unwrap();
    assert_eq!(value, Variant::UInt32(0));

    let current = harness.session().await;
    assert!(current.generation() > first.generation());
    assert!(harness.supervisor.stats().connect_failures >= 3);

    harness.shutdown().await;
}

// =============================================================================
// In-flight Requests
// =============================================================================

#[tokio::test]
async fn test_timeout_recycles_without_corrupting_routing() {
    init_test_logging();
    let harness = SimHarness::demo().started();
    let first = harness.session().await;

    harness.client.inject_request_fault(RequestFault::Hang);
    let reader = harness.reader.clone();
    let hung = tokio::spawn(async move { reader.read_value(&Nodes::temperature()).await });

    let client = Arc::clone(&harness.client);
    wait_for_or_panic(
        HARNESS_TIMEOUT,
        move || client.stats().requests >= 1,
        "hung read to reach the server",
    )
    .await;

    // Concurrent write on the soon-to-be stale session.
    let written = harness
        .reader
        .write_attribute(&Nodes::temperature(), AttributeId::Value, Variant::Double(30.0))
        .await;
    assert!(written.is_ok());

    let error = within(HARNESS_TIMEOUT, hung).await.unwrap().unwrap_err();
    assert!(error.is_session_fatal());

    let second = harness.next_session(first.generation()).await;
    assert_eq!(second.generation(), first.generation() + 1);

    let value = harness.reader.read_value(&Nodes::temperature()).await.unwrap();
    assert_eq!(value, Variant::Double(30.0));
    assert!(harness.supervisor.is_current(&*harness.session().await));
    assert_eq!(harness.supervisor.stats().recycles, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_transport_timeout_event_recycles() {
    init_test_logging();
    let harness = SimHarness::demo().started();
    let first = harness.session().await;

    harness.client.inject_request_fault(RequestFault::Timeout);
    let error = harness.reader.read_value(&Nodes::pressure()).await.unwrap_err();
    assert!(error.is_session_fatal());

    harness.next_session(first.generation()).await;
    assert_eq!(harness.supervisor.stats().recycles, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_waiters() {
    init_test_logging();
    let client = SimulatedClient::with_demo_address_space();
    client.fail_next_connects(u32::MAX);
    let harness = SimHarness::new(client, ConfigFixtures::fast()).started();

    let supervisor = Arc::clone(&harness.supervisor);
    let waiter = tokio::spawn(async move { supervisor.current_session().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    harness.supervisor.shutdown().await;
    let result = within(HARNESS_TIMEOUT, waiter).await.unwrap();
    assert!(result.is_err());

    harness.shutdown().await;
}
