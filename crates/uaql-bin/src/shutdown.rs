// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Graceful shutdown coordination.
//!
//! The first shutdown request wins and its [`ShutdownReason`] is kept; later
//! requests are ignored. Tasks hold a [`ShutdownToken`] and stop when it
//! fires.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

// =============================================================================
// ShutdownReason
// =============================================================================

/// Why the runtime stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// An OS signal arrived.
    Signal(&'static str),
    /// Stopped through [`ShutdownCoordinator::initiate_shutdown`].
    Requested,
    /// The configured run duration elapsed.
    Deadline,
    /// The session supervisor exhausted its reconnect attempts.
    SupervisorStopped,
}

impl ShutdownReason {
    /// Returns `true` if the runtime stopped because of a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::SupervisorStopped)
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "received {}", name),
            Self::Requested => write!(f, "requested"),
            Self::Deadline => write!(f, "run duration elapsed"),
            Self::SupervisorStopped => write!(f, "session supervisor stopped"),
        }
    }
}

// =============================================================================
// ShutdownCoordinator
// =============================================================================

/// Records the first shutdown request and wakes every token.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    state: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator with no shutdown pending.
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    /// Returns a token that fires once shutdown starts.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            state: self.state.subscribe(),
        }
    }

    /// Starts shutdown for `reason`. Returns `false` if already started.
    pub fn initiate(&self, reason: ShutdownReason) -> bool {
        let initiated = self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if initiated {
            info!(%reason, "Shutdown initiated");
        }
        initiated
    }

    /// Starts shutdown on request. Idempotent.
    pub fn initiate_shutdown(&self) {
        self.initiate(ShutdownReason::Requested);
    }

    /// Returns the reason shutdown started, if it has.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.state.borrow()
    }

    /// Returns true if shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason().is_some()
    }

    /// Waits for an OS signal or an earlier request and returns the reason
    /// that won.
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        let mut token = self.token();
        tokio::select! {
            reason = token.cancelled() => reason,
            name = os_signal() => {
                self.initiate(ShutdownReason::Signal(name));
                self.reason().unwrap_or(ShutdownReason::Signal(name))
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn os_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        _ => {
            warn!("Signal handlers unavailable, listening for Ctrl+C only");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn os_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl+C listener failed");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}

// =============================================================================
// ShutdownToken
// =============================================================================

/// Per-task view of the coordinator.
#[derive(Clone)]
pub struct ShutdownToken {
    state: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownToken {
    /// Returns true if shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Resolves once shutdown starts. A dropped coordinator counts as a
    /// request.
    pub async fn cancelled(&mut self) -> ShutdownReason {
        loop {
            if let Some(reason) = *self.state.borrow_and_update() {
                return reason;
            }
            if self.state.changed().await.is_err() {
                return ShutdownReason::Requested;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_initiated());

        assert!(coordinator.initiate(ShutdownReason::Deadline));
        assert!(!coordinator.initiate(ShutdownReason::SupervisorStopped));
        coordinator.initiate_shutdown();

        assert_eq!(coordinator.reason(), Some(ShutdownReason::Deadline));
        assert!(!ShutdownReason::Deadline.is_failure());
        assert!(ShutdownReason::SupervisorStopped.is_failure());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_request() {
        let coordinator = ShutdownCoordinator::new();

        let trigger = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.initiate_shutdown();
        });

        let reason = tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_shutdown())
            .await
            .expect("shutdown wait should resolve");
        assert_eq!(reason, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn test_wait_after_initiation_returns_immediately() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate(ShutdownReason::SupervisorStopped);

        let reason = tokio::time::timeout(Duration::from_millis(100), coordinator.wait_for_shutdown())
            .await
            .expect("already initiated");
        assert_eq!(reason, ShutdownReason::SupervisorStopped);
    }

    #[tokio::test]
    async fn test_token_fires_for_every_holder() {
        let coordinator = ShutdownCoordinator::new();
        let mut first = coordinator.token();
        let second = first.clone();
        assert!(!second.is_shutdown_requested());

        coordinator.initiate(ShutdownReason::Signal("SIGTERM"));
        assert_eq!(first.cancelled().await, ShutdownReason::Signal("SIGTERM"));
        assert!(second.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_token_outlives_coordinator() {
        let coordinator = ShutdownCoordinator::new();
        let mut token = coordinator.token();
        drop(coordinator);

        assert_eq!(token.cancelled().await, ShutdownReason::Requested);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(ShutdownReason::Signal("SIGINT").to_string(), "received SIGINT");
        assert_eq!(ShutdownReason::Deadline.to_string(), "run duration elapsed");
    }
}
