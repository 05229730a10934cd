// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service runtime orchestration.
//!
//! Startup order:
//!
//! 1. Session supervisor over the client, started immediately
//! 2. Attribute reader and subscription multiplexer sharing that supervisor
//! 3. One forwarding task per watch point, republishing onto the bus
//! 4. A bus listener that logs every value
//!
//! Shutdown runs the other way: forwarding tasks stop, the multiplexer
//! terminates its monitored items, then the supervisor closes the session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use uaql_config::{load_config, UaqlConfig, WatchPoint};
use uaql_core::{BusStats, PubSubBus};
use uaql_opcua::{
    AttributeReader, MultiplexerStats, Notification, SessionStats, SessionSupervisor,
    SimulatedClient, SubscriptionMultiplexer,
};

use crate::error::{BinError, BinResult};
use crate::shutdown::{ShutdownCoordinator, ShutdownReason, ShutdownToken};

/// Bus topic carrying every received value.
pub const VALUE_TOPIC: &str = "value";

type ValueBus = PubSubBus<Notification>;

// =============================================================================
// ServiceRuntime
// =============================================================================

/// Runs the supervisor, reader and multiplexer until shutdown.
pub struct ServiceRuntime {
    config: Arc<UaqlConfig>,
    client: Arc<SimulatedClient>,
    bus: Arc<ValueBus>,
    shutdown: ShutdownCoordinator,
    tick: Duration,
    run_for: Option<Duration>,
}

/// Counters reported when the runtime stops.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSummary {
    /// Values received from subscriptions and polls.
    pub values_received: u64,
    /// Failed polls.
    pub poll_failures: u64,
    /// Supervisor counters.
    pub session: SessionStats,
    /// Multiplexer counters.
    pub multiplexer: MultiplexerStats,
    /// Bus counters.
    pub bus: BusStats,
    /// Why the runtime stopped.
    pub reason: Option<ShutdownReason>,
}

impl ServiceRuntime {
    /// Creates a runtime over the demo address space of the simulated client.
    pub fn new(config: UaqlConfig) -> Self {
        Self::with_client(config, Arc::new(SimulatedClient::with_demo_address_space()))
    }

    /// Creates a runtime over the given client.
    pub fn with_client(config: UaqlConfig, client: Arc<SimulatedClient>) -> Self {
        let bus = Arc::new(PubSubBus::new(config.bus.capacity));
        Self {
            config: Arc::new(config),
            client,
            bus,
            shutdown: ShutdownCoordinator::new(),
            tick: Duration::from_secs(1),
            run_for: None,
        }
    }

    /// Sets how often the simulated server changes its values.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Stops after `duration` instead of waiting for a signal.
    pub fn with_run_for(mut self, duration: Option<Duration>) -> Self {
        self.run_for = duration;
        self
    }

    /// Returns the client the runtime drives.
    pub fn client(&self) -> Arc<SimulatedClient> {
        Arc::clone(&self.client)
    }

    /// Returns the value bus; subscribe to [`VALUE_TOPIC`] before `run`.
    pub fn bus(&self) -> Arc<PubSubBus<Notification>> {
        Arc::clone(&self.bus)
    }

    /// Returns a handle that can stop the runtime.
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Runs until a signal, `run_for` elapsing, or the supervisor giving up.
    pub async fn run(self) -> BinResult<RuntimeSummary> {
        info!(
            endpoint = %self.config.opcua.endpoint,
            watch_points = self.config.watch.len(),
            "Starting uaql v{}",
            crate::VERSION
        );

        let supervisor = Arc::new(SessionSupervisor::new(
            Arc::clone(&self.client),
            self.config.opcua.clone(),
        ));
        let mut supervisor_task = supervisor.start()?;
        let reader = AttributeReader::new(Arc::clone(&supervisor));
        let multiplexer = SubscriptionMultiplexer::new(Arc::clone(&supervisor));

        let received = Arc::new(AtomicU64::new(0));
        let poll_failures = Arc::new(AtomicU64::new(0));
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let listener = self
            .bus
            .subscribe(VALUE_TOPIC)
            .map_err(|e| BinError::init(e.to_string()))?;
        tasks.push(tokio::spawn(log_values(listener)));

        for point in self.config.subscribed_points() {
            tasks.push(tokio::spawn(forward_subscription(
                Arc::clone(&multiplexer),
                Arc::clone(&self.bus),
                point.clone(),
                Arc::clone(&received),
            )));
        }
        for point in self.config.polled_points() {
            tasks.push(tokio::spawn(forward_polls(
                reader.clone(),
                Arc::clone(&self.bus),
                point.clone(),
                Arc::clone(&received),
                Arc::clone(&poll_failures),
            )));
        }
        tasks.push(tokio::spawn(drive_simulation(
            Arc::clone(&self.client),
            self.tick,
            self.shutdown.token(),
        )));

        let run_for = self.run_for;
        let deadline = async move {
            match run_for {
                Some(duration) => time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        let reason = tokio::select! {
            reason = self.shutdown.wait_for_shutdown() => reason,
            _ = deadline => ShutdownReason::Deadline,
            _ = &mut supervisor_task => ShutdownReason::SupervisorStopped,
        };
        self.shutdown.initiate(reason);

        info!(%reason, "Cleaning up");
        for task in &tasks {
            task.abort();
        }
        multiplexer.shutdown().await;
        supervisor.shutdown().await;

        let summary = RuntimeSummary {
            values_received: received.load(Ordering::Relaxed),
            poll_failures: poll_failures.load(Ordering::Relaxed),
            session: supervisor.stats(),
            multiplexer: multiplexer.stats(),
            bus: self.bus.stats(),
            reason: Some(reason),
        };
        info!(
            values = summary.values_received,
            recycles = summary.session.recycles,
            rebuilds = summary.multiplexer.rebuilds,
            "uaql shutdown complete"
        );

        if reason.is_failure() {
            return Err(BinError::runtime(
                "session supervisor stopped after exhausting reconnect attempts",
            ));
        }
        Ok(summary)
    }
}

// =============================================================================
// Tasks
// =============================================================================

async fn forward_subscription(
    multiplexer: Arc<SubscriptionMultiplexer<SimulatedClient>>,
    bus: Arc<ValueBus>,
    point: WatchPoint,
    received: Arc<AtomicU64>,
) {
    let name = point.display_name();
    let mut stream = match multiplexer.subscribe(point.node_id.clone(), point.attribute).await {
        Ok(stream) => stream,
        Err(e) => {
            e.log(&format!("subscribe {}", name));
            return;
        }
    };
    info!(point = %name, subscriber = %stream.subscriber_id(), "Subscribed");

    while let Some(notification) = stream.recv().await {
        received.fetch_add(1, Ordering::Relaxed);
        bus.publish(VALUE_TOPIC, notification);
    }
    debug!(point = %name, "Subscription stream ended");
}

async fn forward_polls(
    reader: AttributeReader<SimulatedClient>,
    bus: Arc<ValueBus>,
    point: WatchPoint,
    received: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
) {
    let name = point.display_name();
    let Some(interval) = point.poll_interval else {
        return;
    };
    let mut polling = reader.poll(point.node_id.clone(), point.attribute, interval);
    info!(point = %name, ?interval, "Polling");

    while let Some(outcome) = polling.recv().await {
        match outcome {
            Ok(notification) => {
                received.fetch_add(1, Ordering::Relaxed);
                bus.publish(VALUE_TOPIC, notification);
            }
            Err(e) => {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(point = %name, error = %e, "Poll failed");
            }
        }
    }
}

async fn log_values(mut listener: uaql_core::TopicSubscriber<Notification>) {
    while let Ok(notification) = listener.recv().await {
        info!(
            key = %notification.key,
            value = %notification.value.value,
            status = %notification.value.status,
            "Value"
        );
    }
}

async fn drive_simulation(client: Arc<SimulatedClient>, tick: Duration, mut stop: ShutdownToken) {
    let mut ticker = time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => client.advance(),
            _ = stop.cancelled() => break,
        }
    }
    debug!("Simulation stopped");
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for constructing the service runtime.
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<UaqlConfig>,
    tick: Duration,
    run_for: Option<Duration>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self {
            config_path: None,
            config: None,
            tick: Duration::from_secs(1),
            run_for: None,
        }
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: UaqlConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the simulation tick.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Sets a run duration.
    pub fn run_for(mut self, duration: Option<Duration>) -> Self {
        self.run_for = duration;
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<ServiceRuntime> {
        let config = match self.config {
            Some(cfg) => cfg,
            None => {
                let path = self
                    .config_path
                    .ok_or_else(|| BinError::config("No configuration provided"))?;
                load_config(&path)
                    .map_err(|e| BinError::from(e).with_context(format!("Loading {}", path.display())))?
            }
        };

        if self.tick.is_zero() {
            return Err(BinError::invalid_argument("tick must be greater than 0"));
        }

        Ok(ServiceRuntime::new(config)
            .with_tick(self.tick)
            .with_run_for(self.run_for))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
