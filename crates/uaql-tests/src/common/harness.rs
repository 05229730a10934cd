// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! Wires a supervisor, a reader and a multiplexer to one simulated client.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use uaql_opcua::{
    AttributeReader, OpcUaConfig, Session, SessionSupervisor, SimulatedClient,
    SubscriptionMultiplexer,
};

use super::fixtures::ConfigFixtures;

/// How long harness helpers wait before failing a test.
pub const HARNESS_TIMEOUT: Duration = Duration::from_secs(5);

/// A full client stack over a [`SimulatedClient`].
pub struct SimHarness {
    /// Simulated server.
    pub client: Arc<SimulatedClient>,
    /// Session supervisor.
    pub supervisor: Arc<SessionSupervisor<SimulatedClient>>,
    /// Request facade.
    pub reader: AttributeReader<SimulatedClient>,
    /// Shared monitored items.
    pub multiplexer: Arc<SubscriptionMultiplexer<SimulatedClient>>,
    task: Option<JoinHandle<()>>,
}

impl SimHarness {
    /// Creates a stack over `client` without starting the supervisor.
    pub fn new(client: SimulatedClient, config: OpcUaConfig) -> Self {
        let client = Arc::new(client);
        let supervisor = Arc::new(SessionSupervisor::new(Arc::clone(&client), config));
        let reader = AttributeReader::new(Arc::clone(&supervisor));
        let multiplexer = SubscriptionMultiplexer::new(Arc::clone(&supervisor));
        Self {
            client,
            supervisor,
            reader,
            multiplexer,
            task: None,
        }
    }

    /// Demo address space with [`ConfigFixtures::fast`].
    pub fn demo() -> Self {
        Self::new(SimulatedClient::with_demo_address_space(), ConfigFixtures::fast())
    }

    /// Starts the supervisor loop.
    pub fn start(&mut self) {
        let task = self.supervisor.start().expect("supervisor starts once");
        self.task = Some(task);
    }

    /// Starts the supervisor loop and returns `self`.
    pub fn started(mut self) -> Self {
        self.start();
        self
    }

    /// Waits for the current session.
    pub async fn session(&self) -> Arc<Session> {
        tokio::time::timeout(HARNESS_TIMEOUT, self.supervisor.current_session())
            .await
            .expect("timed out waiting for a session")
            .expect("supervisor stopped while waiting for a session")
    }

    /// Waits for an active session newer than `generation`.
    pub async fn next_session(&self, generation: u64) -> Arc<Session> {
        let mut states = self.supervisor.watch_state();
        let wait = async {
            loop {
                let active = states.borrow_and_update().session();
                if let Some(session) = active {
                    if session.generation() > generation {
                        return session;
                    }
                }
                states.changed().await.expect("supervisor dropped");
            }
        };
        tokio::time::timeout(HARNESS_TIMEOUT, wait)
            .await
            .expect("timed out waiting for a recycled session")
    }

    /// Waits until the supervisor loop has exited.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            tokio::time::timeout(HARNESS_TIMEOUT, task)
                .await
                .expect("supervisor loop did not exit")
                .expect("supervisor loop panicked");
        }
    }

    /// Tears down the multiplexer, then the supervisor.
    pub async fn shutdown(mut self) {
        self.multiplexer.shutdown().await;
        self.supervisor.shutdown().await;
        self.join().await;
    }
}
