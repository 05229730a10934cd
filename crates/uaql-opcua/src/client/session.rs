// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session supervision.
//!
//! [`SessionSupervisor`] keeps exactly one usable session against the server.
//! It connects with backoff, publishes the current session through a
//! `watch` channel, and recycles the session when a session-fatal error is
//! reported against it or the transport closes.
//!
//! # State Machine
//!
//! ```text
//!  Disconnected ──► Connecting ──► Active(session)
//!       ▲              │  ▲              │
//!       │              └──┘ retry        │ fatal error / transport closed
//!       │                                ▼
//!       └──────────────────────── ClosingForRecycle
//! ```
//!
//! # Example
//!
//! ```ignore
//! let supervisor = Arc::new(SessionSupervisor::new(client, config));
//! let task = supervisor.start()?;
//!
//! let session = supervisor.current_session().await?;
//! // ... issue requests with session.handle() ...
//!
//! supervisor.shutdown().await;
//! task.await?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};
use uaql_core::Backoff;

use crate::client::transport::{ProtocolClient, SessionHandle, TransportEvent};
use crate::error::{ConnectionError, OpcUaError, OpcUaResult};
use crate::types::OpcUaConfig;

// =============================================================================
// Session
// =============================================================================

/// An activated session.
///
/// Each activation gets a new generation number, which is how stale sessions
/// are told apart from the current one. Consumers must not cache a session
/// across operations.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    generation: u64,
    activated_at: DateTime<Utc>,
}

impl Session {
    fn new(handle: SessionHandle, generation: u64) -> Self {
        Self {
            handle,
            generation,
            activated_at: Utc::now(),
        }
    }

    /// Returns the protocol-level handle.
    #[inline]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Returns the activation generation (starts at 1).
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns when the session became active.
    #[inline]
    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation
    }
}

impl Eq for Session {}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (generation {})", self.handle.id, self.generation)
    }
}

// =============================================================================
// SessionState
// =============================================================================

/// Supervisor state.
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    /// No connection.
    #[default]
    Disconnected,

    /// Connecting or creating a session.
    Connecting,

    /// A usable session exists.
    Active(Arc<Session>),

    /// The session is being released before reconnecting.
    ClosingForRecycle,
}

impl SessionState {
    /// Returns the active session, if any.
    pub fn session(&self) -> Option<Arc<Session>> {
        match self {
            Self::Active(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Returns `true` if a session is active.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    /// Returns `true` if `next` is a legal successor of this state.
    ///
    /// `Connecting -> Connecting` is a retry and `Connecting -> Disconnected`
    /// only happens when the supervisor stops.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connecting)
                | (Self::Connecting, Self::Active(_))
                | (Self::Connecting, Self::Disconnected)
                | (Self::Active(_), Self::ClosingForRecycle)
                | (Self::ClosingForRecycle, Self::Disconnected)
                | (Self::ClosingForRecycle, Self::Active(_))
        )
    }

    /// Returns the state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Active(_) => "Active",
            Self::ClosingForRecycle => "ClosingForRecycle",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active(session) => write!(f, "Active({})", session),
            other => f.write_str(other.name()),
        }
    }
}

// =============================================================================
// SessionStats
// =============================================================================

/// Supervisor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Connect attempts (each includes session creation).
    pub connect_attempts: u64,
    /// Failed connect or session creation attempts.
    pub connect_failures: u64,
    /// Sessions activated.
    pub sessions_created: u64,
    /// Sessions recycled after a fatal error or transport close.
    pub recycles: u64,
    /// Errors reported through [`SessionSupervisor::report_error`].
    pub errors_reported: u64,
    /// Fatal reports ignored because the session was no longer current.
    pub stale_reports_ignored: u64,
}

#[derive(Debug, Default)]
struct AtomicSessionStats {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    sessions_created: AtomicU64,
    recycles: AtomicU64,
    errors_reported: AtomicU64,
    stale_reports_ignored: AtomicU64,
}

impl AtomicSessionStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
            errors_reported: self.errors_reported.load(Ordering::Relaxed),
            stale_reports_ignored: self.stale_reports_ignored.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Recycle Plumbing
// =============================================================================

#[derive(Debug)]
struct RecycleRequest {
    generation: u64,
    reason: String,
}

#[derive(Debug)]
enum RecycleReason {
    Fatal(String),
    Transport(TransportEvent),
    Shutdown,
}

impl fmt::Display for RecycleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal(reason) => write!(f, "fatal error: {}", reason),
            Self::Transport(event) => write!(f, "{}", event),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Resolves once the flag is set (or its sender is gone).
pub(crate) async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    while !*stop_rx.borrow_and_update() {
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

// =============================================================================
// SessionSupervisor
// =============================================================================

/// Owns the connect/retry state machine and hands out the current session.
pub struct SessionSupervisor<C: ProtocolClient> {
    client: Arc<C>,
    config: OpcUaConfig,
    state_tx: watch::Sender<SessionState>,
    stop_tx: watch::Sender<bool>,
    finished_tx: watch::Sender<bool>,
    recycle_tx: mpsc::UnboundedSender<RecycleRequest>,
    recycle_rx: Mutex<Option<mpsc::UnboundedReceiver<RecycleRequest>>>,
    /// Highest generation a recycle was requested for.
    recycle_requested: AtomicU64,
    generation: AtomicU64,
    started: AtomicBool,
    stats: AtomicSessionStats,
}

impl<C: ProtocolClient> SessionSupervisor<C> {
    /// Creates a supervisor. Nothing happens until [`start`](Self::start).
    pub fn new(client: Arc<C>, config: OpcUaConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (stop_tx, _) = watch::channel(false);
        let (finished_tx, _) = watch::channel(false);
        let (recycle_tx, recycle_rx) = mpsc::unbounded_channel();

        Self {
            client,
            config,
            state_tx,
            stop_tx,
            finished_tx,
            recycle_tx,
            recycle_rx: Mutex::new(Some(recycle_rx)),
            recycle_requested: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            started: AtomicBool::new(false),
            stats: AtomicSessionStats::default(),
        }
    }

    /// Returns the protocol client.
    #[inline]
    pub fn client(&self) -> Arc<C> {
        Arc::clone(&self.client)
    }

    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &OpcUaConfig {
        &self.config
    }

    /// Spawns the supervision loop.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if the loop was started before.
    pub fn start(self: &Arc<Self>) -> OpcUaResult<JoinHandle<()>> {
        let recycle_rx = self
            .recycle_rx
            .lock()
            .take()
            .ok_or(OpcUaError::Connection(ConnectionError::AlreadyRunning))?;

        self.started.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.run(recycle_rx).await;
            this.finished_tx.send_replace(true);
        }))
    }

    // =========================================================================
    // Consumer API
    // =========================================================================

    /// Returns the current session, waiting until one is active.
    ///
    /// All concurrent waiters are released with the same session.
    ///
    /// # Errors
    ///
    /// Fails with `SupervisorStopped` once the supervisor has stopped.
    pub async fn current_session(&self) -> OpcUaResult<Arc<Session>> {
        let mut state_rx = self.state_tx.subscribe();
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            if *stop_rx.borrow_and_update() {
                return Err(OpcUaError::supervisor_stopped());
            }

            let current = state_rx.borrow_and_update().session();
            if let Some(session) = current {
                return Ok(session);
            }

            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(OpcUaError::supervisor_stopped());
                    }
                }
                _ = stopped(&mut stop_rx) => {}
            }
        }
    }

    /// Returns the current session without waiting.
    pub fn try_current_session(&self) -> Option<Arc<Session>> {
        self.state_tx.borrow().session()
    }

    /// Returns `true` if `session` is the active session.
    pub fn is_current(&self, session: &Session) -> bool {
        self.state_tx
            .borrow()
            .session()
            .map_or(false, |current| current.generation == session.generation)
    }

    /// Classifies `error` against the session that produced it.
    ///
    /// Returns `true` if this report triggered a recycle. Benign errors,
    /// reports for a superseded session and repeat reports for a session
    /// already being recycled return `false`.
    pub fn report_error(&self, session: &Session, error: &OpcUaError) -> bool {
        AtomicSessionStats::bump(&self.stats.errors_reported);

        let class = error.classify();
        if !class.is_session_fatal() {
            debug!(
                session = %session,
                error = %error,
                "Benign error reported, session kept"
            );
            return false;
        }

        if !self.is_current(session) {
            AtomicSessionStats::bump(&self.stats.stale_reports_ignored);
            debug!(
                session = %session,
                error = %error,
                "Fatal error reported for a stale session, ignored"
            );
            return false;
        }

        let previous = self
            .recycle_requested
            .fetch_max(session.generation, Ordering::SeqCst);
        if previous >= session.generation {
            AtomicSessionStats::bump(&self.stats.stale_reports_ignored);
            debug!(session = %session, "Recycle already requested");
            return false;
        }

        warn!(
            session = %session,
            error = %error,
            code = %error.error_code(),
            "Session-fatal error, requesting recycle"
        );

        self.recycle_tx
            .send(RecycleRequest {
                generation: session.generation,
                reason: error.to_string(),
            })
            .is_ok()
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Returns a receiver of state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called or the
    /// retry policy gave up.
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Stops the loop, closes the session and disconnects.
    ///
    /// Waiting [`current_session`](Self::current_session) callers fail with
    /// `SupervisorStopped`.
    pub async fn shutdown(&self) {
        if self.stop_tx.send_replace(true) {
            return;
        }
        info!(endpoint = %self.config.endpoint, "Session supervisor shutting down");

        if !self.started.load(Ordering::SeqCst) {
            return;
        }

        let mut finished_rx = self.finished_tx.subscribe();
        let grace = self.config.request_timeout * 2;
        if time::timeout(grace, stopped(&mut finished_rx)).await.is_err() {
            warn!(?grace, "Session supervisor did not stop in time");
        }
    }

    // =========================================================================
    // Supervision Loop
    // =========================================================================

    async fn run(&self, mut recycle_rx: mpsc::UnboundedReceiver<RecycleRequest>) {
        let mut stop_rx = self.stop_tx.subscribe();
        info!(
            endpoint = %self.config.endpoint,
            client = %self.client.display_name(),
            reconnect = %self.config.reconnect,
            "Session supervisor started"
        );

        loop {
            let (session, mut events) = match self.establish(&mut stop_rx).await {
                Ok(Some(established)) => established,
                Ok(None) => break,
                Err(error) => {
                    error.log("session supervisor");
                    self.stop_tx.send_replace(true);
                    break;
                }
            };

            let reason = self
                .wait_for_recycle(&session, &mut events, &mut recycle_rx, &mut stop_rx)
                .await;
            let shutting_down = matches!(reason, RecycleReason::Shutdown);
            self.recycle(&session, reason).await;

            if shutting_down {
                break;
            }
        }

        self.set_state(SessionState::Disconnected);
        info!(endpoint = %self.config.endpoint, "Session supervisor stopped");
    }

    /// Connects and creates a session, retrying per the reconnect policy.
    ///
    /// Returns `Ok(None)` when stopped while connecting.
    async fn establish(
        &self,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> OpcUaResult<Option<(Arc<Session>, broadcast::Receiver<TransportEvent>)>> {
        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            if *stop_rx.borrow() {
                return Ok(None);
            }

            self.set_state(SessionState::Connecting);
            let events = self.client.subscribe_events();
            let attempt = backoff.retries() + 1;
            AtomicSessionStats::bump(&self.stats.connect_attempts);

            let outcome = tokio::select! {
                outcome = self.connect_once() => outcome,
                _ = stopped(stop_rx) => {
                    if let Err(error) = self.client.disconnect().await {
                        debug!(error = %error, "Disconnect failed");
                    }
                    return Ok(None);
                }
            };

            let error = match outcome {
                Ok(handle) => return Ok(Some((self.activate(handle), events))),
                Err(error) => error,
            };

            AtomicSessionStats::bump(&self.stats.connect_failures);
            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        endpoint = %self.config.endpoint,
                        attempt,
                        retry_in = ?delay,
                        error = %error,
                        "Connect attempt failed"
                    );
                    tokio::select! {
                        _ = time::sleep(delay) => {}
                        _ = stopped(stop_rx) => return Ok(None),
                    }
                }
                None => {
                    error!(
                        endpoint = %self.config.endpoint,
                        attempts = attempt,
                        error = %error,
                        "Giving up connecting"
                    );
                    return Err(OpcUaError::connection(ConnectionError::retries_exhausted(
                        &self.config.endpoint,
                        attempt,
                    )));
                }
            }
        }
    }

    async fn connect_once(&self) -> OpcUaResult<SessionHandle> {
        let timeout = self.config.request_timeout;
        let endpoint = &self.config.endpoint;

        match time::timeout(timeout, self.client.connect(endpoint)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(OpcUaError::connection(ConnectionError::refused(
                    endpoint,
                    format!("connect timed out after {:?}", timeout),
                )))
            }
        }
        debug!(endpoint = %endpoint, "Transport connected");

        let name = self.config.effective_session_name();
        let created = match time::timeout(timeout, self.client.create_session(name)).await {
            Ok(result) => result,
            Err(_) => Err(OpcUaError::connection(ConnectionError::handshake_failed(
                endpoint,
                format!("session creation timed out after {:?}", timeout),
            ))),
        };

        if created.is_err() {
            if let Err(error) = self.client.disconnect().await {
                debug!(error = %error, "Disconnect after failed session creation failed");
            }
        }
        created
    }

    fn activate(&self, handle: SessionHandle) -> Arc<Session> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(Session::new(handle, generation));
        AtomicSessionStats::bump(&self.stats.sessions_created);

        self.set_state(SessionState::Active(Arc::clone(&session)));
        info!(
            session_id = %session.handle.id,
            generation,
            "Session active"
        );
        session
    }

    async fn wait_for_recycle(
        &self,
        session: &Session,
        events: &mut broadcast::Receiver<TransportEvent>,
        recycle_rx: &mut mpsc::UnboundedReceiver<RecycleRequest>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> RecycleReason {
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = stopped(stop_rx) => return RecycleReason::Shutdown,

                request = recycle_rx.recv() => match request {
                    Some(request) if request.generation == session.generation => {
                        return RecycleReason::Fatal(request.reason);
                    }
                    Some(request) => {
                        debug!(
                            requested = request.generation,
                            current = session.generation,
                            "Dropping recycle request for an old session"
                        );
                    }
                    None => return RecycleReason::Shutdown,
                },

                event = events.recv(), if events_open => match event {
                    Ok(event) => return RecycleReason::Transport(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Transport events lagged");
                    }
                    Err(RecvError::Closed) => {
                        events_open = false;
                    }
                },
            }
        }
    }

    async fn recycle(&self, session: &Session, reason: RecycleReason) {
        self.set_state(SessionState::ClosingForRecycle);

        match &reason {
            RecycleReason::Shutdown => {
                info!(session = %session, "Closing session");
            }
            reason => {
                AtomicSessionStats::bump(&self.stats.recycles);
                warn!(session = %session, reason = %reason, "Recycling session");
            }
        }

        let timeout = self.config.request_timeout;
        match time::timeout(timeout, self.client.close_session(&session.handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => debug!(error = %error, "Closing session failed"),
            Err(_) => debug!(?timeout, "Closing session timed out"),
        }
        match time::timeout(timeout, self.client.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => debug!(error = %error, "Disconnect failed"),
            Err(_) => debug!(?timeout, "Disconnect timed out"),
        }

        self.set_state(SessionState::Disconnected);
    }

    fn set_state(&self, next: SessionState) {
        self.state_tx.send_if_modified(|state| {
            if matches!((&*state, &next), (SessionState::Disconnected, SessionState::Disconnected)) {
                return false;
            }
            if !state.can_transition_to(&next) {
                warn!(from = %state, to = %next, "Unexpected session state transition");
            }
            debug!(from = %state, to = %next, "Session state transition");
            *state = next;
            true
        });
    }
}

impl<C: ProtocolClient> fmt::Debug for SessionSupervisor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSupervisor")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state_tx.borrow().name())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::simulated::SimulatedClient;
    use crate::error::{Operation, RequestError};
    use crate::types::{NodeId, StatusCode};
    use std::time::Duration;
    use uaql_core::BackoffPolicy;

    fn config() -> OpcUaConfig {
        OpcUaConfig::builder()
            .endpoint("opc.tcp://sim:4840")
            .request_timeout(Duration::from_millis(200))
            .reconnect(BackoffPolicy::fixed(Duration::from_millis(10)))
            .build()
            .unwrap()
    }

    fn fatal() -> OpcUaError {
        OpcUaError::request(RequestError::failed(
            Operation::Read,
            "ns=2;s=Temperature",
            StatusCode::BAD_SESSION_CLOSED,
        ))
    }

    #[test]
    fn test_state_transitions() {
        let session = Arc::new(Session::new(
            SessionHandle::new(NodeId::numeric(1, 1), "test"),
            1,
        ));
        let active = SessionState::Active(session);

        assert!(SessionState::Disconnected.can_transition_to(&SessionState::Connecting));
        assert!(SessionState::Connecting.can_transition_to(&active));
        assert!(active.can_transition_to(&SessionState::ClosingForRecycle));
        assert!(SessionState::ClosingForRecycle.can_transition_to(&SessionState::Disconnected));

        assert!(!SessionState::Disconnected.can_transition_to(&active));
        assert!(!active.can_transition_to(&SessionState::Connecting));
        assert!(!SessionState::ClosingForRecycle.can_transition_to(&SessionState::Connecting));
    }

    #[tokio::test]
    async fn test_current_session_waits_for_connect() {
        let client = Arc::new(SimulatedClient::with_demo_address_space());
        client.fail_next_connects(2);
        let supervisor = Arc::new(SessionSupervisor::new(Arc::clone(&client), config()));

        let waiter = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.current_session().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let task = supervisor.start().unwrap();
        let session = waiter.await.unwrap().unwrap();
        assert_eq!(session.generation(), 1);

        let stats = supervisor.stats();
        assert_eq!(stats.connect_attempts, 3);
        assert_eq!(stats.connect_failures, 2);

        supervisor.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_disconnect_does_not_block_retry() {
        let client = Arc::new(SimulatedClient::with_demo_address_space());
        client.fail_next_sessions(1);
        client.fail_next_disconnects(1);
        let supervisor = Arc::new(SessionSupervisor::new(Arc::clone(&client), config()));

        let task = supervisor.start().unwrap();
        let session = supervisor.current_session().await.unwrap();
        assert_eq!(session.generation(), 1);
        assert_eq!(supervisor.stats().connect_failures, 1);
        assert_eq!(client.stats().disconnects, 1);
        assert_eq!(client.stats().sessions_created, 1);

        supervisor.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let client = Arc::new(SimulatedClient::new());
        let supervisor = Arc::new(SessionSupervisor::new(client, config()));
        let task = supervisor.start().unwrap();
        assert!(supervisor.start().is_err());

        supervisor.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_report_error_benign_and_stale() {
        let client = Arc::new(SimulatedClient::with_demo_address_space());
        let supervisor = Arc::new(SessionSupervisor::new(Arc::clone(&client), config()));
        let task = supervisor.start().unwrap();

        let first = supervisor.current_session().await.unwrap();
        let benign = OpcUaError::request_failed(
            Operation::Read,
            "ns=2;s=Missing",
            StatusCode::BAD_NODE_ID_UNKNOWN,
        );
        assert!(!supervisor.report_error(&first, &benign));
        assert!(supervisor.is_current(&first));

        assert!(supervisor.report_error(&first, &fatal()));
        assert!(!supervisor.report_error(&first, &fatal()));

        let mut second = supervisor.current_session().await.unwrap();
        while second.generation() == first.generation() {
            tokio::time::sleep(Duration::from_millis(5)).await;
            second = supervisor.current_session().await.unwrap();
        }
        assert_eq!(second.generation(), 2);

        assert!(!supervisor.report_error(&first, &fatal()));
        assert!(supervisor.is_current(&second));
        assert_eq!(supervisor.stats().recycles, 1);

        supervisor.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let client = Arc::new(SimulatedClient::new());
        client.fail_next_connects(10);
        let mut config = config();
        config.reconnect = BackoffPolicy::fixed(Duration::from_millis(1)).with_max_retries(2);
        let supervisor = Arc::new(SessionSupervisor::new(client, config));

        let task = supervisor.start().unwrap();
        task.await.unwrap();

        assert!(supervisor.is_stopped());
        assert_eq!(supervisor.stats().connect_attempts, 3);
        assert!(matches!(
            supervisor.current_session().await,
            Err(OpcUaError::Connection(ConnectionError::SupervisorStopped))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let client = Arc::new(SimulatedClient::new());
        client.fail_next_connects(u32::MAX);
        let supervisor = Arc::new(SessionSupervisor::new(client, config()));
        let task = supervisor.start().unwrap();

        let waiter = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.current_session().await })
        };

        supervisor.shutdown().await;
        task.await.unwrap();

        assert!(waiter.await.unwrap().is_err());
        assert!(matches!(supervisor.state(), SessionState::Disconnected));
    }
}
