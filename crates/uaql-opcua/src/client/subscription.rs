// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription multiplexing.
//!
//! [`SubscriptionMultiplexer`] maps any number of logical subscribers onto at
//! most one server-side monitored item per [`SubscriptionKey`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   SubscriptionMultiplexer                    │
//! │   subscribers: SubscriberId -> SubscriptionKey               │
//! │   slots:       SubscriptionKey -> KeySlot                    │
//! └──────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌──────────────────────────────┐ ┌──────────────────────────────┐
//! │ KeySlot "ns=2;s=A#Value"     │ │ KeySlot "ns=2;s=B#Value"     │
//! │  entry (tokio Mutex):        │ │  entry (tokio Mutex):        │
//! │   refcount, monitored item   │ │   refcount, monitored item   │
//! │  fanout: S1, S2 senders      │ │  fanout: S3 sender           │
//! └──────────────────────────────┘ └──────────────────────────────┘
//! ```
//!
//! Subscribe, unsubscribe and rebuild all take the per-key entry lock, so a
//! last unsubscribe can never race a first subscribe into an orphaned item.
//! Each subscribe runs on its own task: a caller that stops waiting leaves no
//! slot behind, and an item created after it left is torn down again.
//!
//! Subscriber streams are unbounded. Every notification of a key reaches
//! every live stream of that key, in arrival order.
//!
//! After every session recycle the rebuild task recreates the monitored item
//! of every key that still has subscribers. Subscriber streams are not told;
//! they see a gap and then resume.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace, warn};

use crate::client::session::{stopped, Session, SessionState, SessionSupervisor};
use crate::client::transport::{DataValue, MonitoredItemId, ProtocolClient};
use crate::error::{OpcUaError, OpcUaResult, Operation, SubscriptionError};
use crate::types::{AttributeId, NodeId, SubscriptionKey};

// =============================================================================
// Public Types
// =============================================================================

/// Opaque id of a logical subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Returns the raw id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A change notification for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// The key that changed.
    pub key: SubscriptionKey,

    /// The new value.
    pub value: DataValue,

    /// When the notification reached the multiplexer.
    pub received_at: DateTime<Utc>,
}

/// Push-based stream of notifications for one logical subscription.
///
/// The stream ends after [`SubscriptionMultiplexer::shutdown`].
#[derive(Debug)]
pub struct NotificationStream {
    subscriber_id: SubscriberId,
    key: SubscriptionKey,
    receiver: mpsc::UnboundedReceiver<Notification>,
}

impl NotificationStream {
    /// Waits for the next notification.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    /// Returns a buffered notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    /// Returns the subscriber id.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    /// Returns the subscribed key.
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }
}

/// Multiplexer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MultiplexerStats {
    /// Monitored items created (including rebuilds).
    pub items_created: u64,
    /// Terminate calls issued.
    pub items_terminated: u64,
    /// Terminate calls that failed.
    pub teardown_failures: u64,
    /// Rebuild passes after a session change.
    pub rebuilds: u64,
    /// Notifications handed to subscriber streams.
    pub notifications_delivered: u64,
    /// Notifications addressed to a stream that was dropped without
    /// unsubscribing.
    pub notifications_dropped: u64,
}

#[derive(Debug, Default)]
struct AtomicMultiplexerStats {
    items_created: AtomicU64,
    items_terminated: AtomicU64,
    teardown_failures: AtomicU64,
    rebuilds: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_dropped: AtomicU64,
}

impl AtomicMultiplexerStats {
    fn snapshot(&self) -> MultiplexerStats {
        MultiplexerStats {
            items_created: self.items_created.load(Ordering::Relaxed),
            items_terminated: self.items_terminated.load(Ordering::Relaxed),
            teardown_failures: self.teardown_failures.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Per-key State
// =============================================================================

/// Senders of every subscriber of one key.
#[derive(Debug, Default)]
struct Fanout {
    senders: RwLock<HashMap<SubscriberId, mpsc::UnboundedSender<Notification>>>,
}

impl Fanout {
    fn deliver(&self, notification: &Notification, stats: &AtomicMultiplexerStats) {
        let senders = self.senders.read();
        for (id, sender) in senders.iter() {
            if sender.send(notification.clone()).is_ok() {
                stats.notifications_delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                stats.notifications_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(subscriber = %id, key = %notification.key, "Subscriber stream dropped");
            }
        }
    }
}

/// A live monitored item bound to a session.
#[derive(Debug)]
struct ActiveItem {
    id: MonitoredItemId,
    session: Arc<Session>,
    forwarder: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct KeyEntry {
    refcount: usize,
    item: Option<ActiveItem>,
    /// Set once the slot left the table; lockers must fetch a fresh slot.
    retired: bool,
}

#[derive(Debug)]
struct KeySlot {
    key: SubscriptionKey,
    entry: tokio::sync::Mutex<KeyEntry>,
    fanout: Arc<Fanout>,
}

impl KeySlot {
    fn new(key: SubscriptionKey) -> Self {
        Self {
            key,
            entry: tokio::sync::Mutex::new(KeyEntry::default()),
            fanout: Arc::new(Fanout::default()),
        }
    }
}

// =============================================================================
// SubscriptionMultiplexer
// =============================================================================

/// Deduplicates logical subscriptions onto monitored items.
pub struct SubscriptionMultiplexer<C: ProtocolClient> {
    supervisor: Arc<SessionSupervisor<C>>,
    slots: Mutex<HashMap<SubscriptionKey, Arc<KeySlot>>>,
    subscribers: Mutex<HashMap<SubscriberId, SubscriptionKey>>,
    next_subscriber: AtomicU64,
    stats: Arc<AtomicMultiplexerStats>,
    rebuild_task: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl<C: ProtocolClient> SubscriptionMultiplexer<C> {
    /// Creates a multiplexer and spawns its rebuild task.
    pub fn new(supervisor: Arc<SessionSupervisor<C>>) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        let multiplexer = Arc::new(Self {
            supervisor,
            slots: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            stats: Arc::new(AtomicMultiplexerStats::default()),
            rebuild_task: Mutex::new(None),
            stop_tx,
        });

        let task = tokio::spawn(Self::rebuild_loop(
            Arc::downgrade(&multiplexer),
            multiplexer.supervisor.watch_state(),
            multiplexer.stop_tx.subscribe(),
        ));
        *multiplexer.rebuild_task.lock() = Some(task);
        multiplexer
    }

    // =========================================================================
    // Subscribe / Unsubscribe
    // =========================================================================

    /// Registers a logical subscription for `(node_id, attribute)`.
    ///
    /// The first subscriber of a key creates the monitored item against the
    /// current session, waiting for one if needed. Later subscribers share it.
    /// Dropping the returned future before it resolves undoes the
    /// registration.
    ///
    /// # Errors
    ///
    /// Fails if the monitored item cannot be created; the subscriber is then
    /// not registered.
    pub async fn subscribe(
        self: &Arc<Self>,
        node_id: NodeId,
        attribute: AttributeId,
    ) -> OpcUaResult<NotificationStream> {
        let key = SubscriptionKey::new(node_id, attribute);
        let (reply_tx, reply_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(self).register(key, reply_tx));

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(OpcUaError::supervisor_stopped()),
        }
    }

    async fn register(
        self: Arc<Self>,
        key: SubscriptionKey,
        mut reply: oneshot::Sender<OpcUaResult<NotificationStream>>,
    ) {
        let result = loop {
            if *self.stop_tx.borrow() {
                break Err(OpcUaError::supervisor_stopped());
            }

            let slot = self.slot_for(&key);
            let mut entry = slot.entry.lock().await;
            if entry.retired {
                continue;
            }

            let subscriber_id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
            let (sender, receiver) = mpsc::unbounded_channel();
            slot.fanout.senders.write().insert(subscriber_id, sender);

            if entry.refcount == 0 {
                let mut stop_rx = self.stop_tx.subscribe();
                let session = tokio::select! {
                    session = self.supervisor.current_session() => session,
                    _ = stopped(&mut stop_rx) => Err(OpcUaError::supervisor_stopped()),
                    _ = reply.closed() => {
                        debug!(key = %key, "Subscribe abandoned while waiting for a session");
                        self.abandon(&slot, &mut entry, subscriber_id);
                        return;
                    }
                };
                let created = match session {
                    Ok(session) => self.create_item(&slot, &session).await,
                    Err(error) => Err(error),
                };

                match created {
                    Ok(item) => entry.item = Some(item),
                    Err(error) => {
                        self.abandon(&slot, &mut entry, subscriber_id);
                        break Err(error);
                    }
                }
            }

            entry.refcount += 1;
            self.subscribers.lock().insert(subscriber_id, key.clone());
            debug!(
                subscriber = %subscriber_id,
                key = %key,
                refcount = entry.refcount,
                "Subscribed"
            );

            break Ok(NotificationStream {
                subscriber_id,
                key: key.clone(),
                receiver,
            });
        };

        if let Err(Ok(stream)) = reply.send(result) {
            debug!(subscriber = %stream.subscriber_id, key = %key, "Subscriber left before its item was ready");
            self.unsubscribe(stream.subscriber_id).await;
        }
    }

    /// Removes a logical subscription.
    ///
    /// Delivery to the subscriber stops immediately. The last subscriber of a
    /// key tears the monitored item down; teardown failures are logged only.
    /// Returns `false` for unknown or already removed ids.
    pub async fn unsubscribe(&self, subscriber_id: SubscriberId) -> bool {
        let Some(key) = self.subscribers.lock().remove(&subscriber_id) else {
            trace!(subscriber = %subscriber_id, "Unsubscribe for unknown subscriber");
            return false;
        };
        let Some(slot) = self.slots.lock().get(&key).cloned() else {
            return false;
        };

        slot.fanout.senders.write().remove(&subscriber_id);

        let mut entry = slot.entry.lock().await;
        entry.refcount = entry.refcount.saturating_sub(1);
        debug!(
            subscriber = %subscriber_id,
            key = %key,
            refcount = entry.refcount,
            "Unsubscribed"
        );

        if entry.refcount == 0 {
            entry.retired = true;
            if let Some(item) = entry.item.take() {
                self.teardown(&key, item).await;
            }
            self.remove_slot(&slot);
        }
        true
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns the number of live subscribers of a key.
    pub async fn refcount(&self, node_id: &NodeId, attribute: AttributeId) -> usize {
        let key = SubscriptionKey::new(node_id.clone(), attribute);
        let slot = self.slots.lock().get(&key).cloned();
        match slot {
            Some(slot) => slot.entry.lock().await.refcount,
            None => 0,
        }
    }

    /// Returns `true` if the key currently owns a monitored item.
    pub async fn has_monitored_item(&self, node_id: &NodeId, attribute: AttributeId) -> bool {
        let key = SubscriptionKey::new(node_id.clone(), attribute);
        let slot = self.slots.lock().get(&key).cloned();
        match slot {
            Some(slot) => slot.entry.lock().await.item.is_some(),
            None => false,
        }
    }

    /// Returns the number of keys with live subscribers.
    pub fn key_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns the number of live logical subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> MultiplexerStats {
        self.stats.snapshot()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Terminates every monitored item and ends every stream.
    pub async fn shutdown(&self) {
        if self.stop_tx.send_replace(true) {
            return;
        }
        if let Some(task) = self.rebuild_task.lock().take() {
            task.abort();
        }

        let slots: Vec<Arc<KeySlot>> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        let count = slots.len();
        for slot in slots {
            let mut entry = slot.entry.lock().await;
            entry.retired = true;
            entry.refcount = 0;
            if let Some(item) = entry.item.take() {
                self.teardown(&slot.key, item).await;
            }
            slot.fanout.senders.write().clear();
        }
        self.subscribers.lock().clear();

        info!(keys = count, "Subscription multiplexer stopped");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn slot_for(&self, key: &SubscriptionKey) -> Arc<KeySlot> {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(KeySlot::new(key.clone()))),
        )
    }

    fn remove_slot(&self, slot: &Arc<KeySlot>) {
        let mut slots = self.slots.lock();
        if slots
            .get(&slot.key)
            .map_or(false, |current| Arc::ptr_eq(current, slot))
        {
            slots.remove(&slot.key);
        }
    }

    /// Drops a subscriber that never got registered. A slot without
    /// subscribers leaves the table.
    fn abandon(&self, slot: &Arc<KeySlot>, entry: &mut KeyEntry, subscriber_id: SubscriberId) {
        slot.fanout.senders.write().remove(&subscriber_id);
        if entry.refcount == 0 {
            entry.retired = true;
            self.remove_slot(slot);
        }
    }

    async fn create_item(&self, slot: &KeySlot, session: &Arc<Session>) -> OpcUaResult<ActiveItem> {
        let config = self.supervisor.config();
        let client = self.supervisor.client();
        let timeout = config.request_timeout;

        let created = match time::timeout(
            timeout,
            client.create_monitored_item(
                session.handle(),
                &slot.key,
                &config.subscription,
                &config.monitoring,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OpcUaError::request_timeout(
                Operation::CreateMonitoredItem,
                slot.key.to_string(),
                timeout,
            )),
        };

        let handle = match created {
            Ok(handle) => handle,
            Err(error) => {
                let recycled = self.supervisor.report_error(session, &error);
                warn!(key = %slot.key, error = %error, recycled, "Monitored item creation failed");
                return Err(error);
            }
        };

        self.stats.items_created.fetch_add(1, Ordering::Relaxed);
        info!(
            key = %slot.key,
            item_id = %handle.id,
            generation = session.generation(),
            "Monitored item created"
        );

        let forwarder = tokio::spawn(forward(
            slot.key.clone(),
            handle.changes,
            Arc::clone(&slot.fanout),
            Arc::clone(&self.stats),
        ));

        Ok(ActiveItem {
            id: handle.id,
            session: Arc::clone(session),
            forwarder,
        })
    }

    async fn teardown(&self, key: &SubscriptionKey, item: ActiveItem) {
        item.forwarder.abort();

        if !self.supervisor.is_current(&item.session) {
            debug!(key = %key, item_id = %item.id, "Discarding item of a stale session");
            return;
        }

        self.stats.items_terminated.fetch_add(1, Ordering::Relaxed);
        let timeout = self.supervisor.config().request_timeout;
        let client = self.supervisor.client();
        let result = match time::timeout(timeout, client.terminate(item.session.handle(), item.id)).await {
            Ok(result) => result,
            Err(_) => Err(OpcUaError::request_timeout(
                Operation::Terminate,
                key.to_string(),
                timeout,
            )),
        };

        match result {
            Ok(()) => debug!(key = %key, item_id = %item.id, "Monitored item terminated"),
            Err(error) => {
                self.stats.teardown_failures.fetch_add(1, Ordering::Relaxed);
                self.supervisor.report_error(&item.session, &error);
                let teardown = SubscriptionError::teardown_failed(key, error.to_string());
                warn!(item_id = %item.id, error = %teardown, "Teardown failed");
            }
        }
    }

    async fn rebuild_loop(
        multiplexer: Weak<Self>,
        mut state_rx: watch::Receiver<SessionState>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut last_generation = None;

        loop {
            let active = state_rx.borrow_and_update().session();
            if let Some(session) = active {
                if last_generation != Some(session.generation()) {
                    let Some(this) = multiplexer.upgrade() else {
                        break;
                    };
                    this.reconcile(&session).await;
                    last_generation = Some(session.generation());
                }
            }

            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Rebuild task stopped");
    }

    /// Binds every wanted key to a monitored item on `session`.
    ///
    /// Slots whose lock is held (typically by a first subscriber still
    /// waiting for a session) are visited after all others.
    async fn reconcile(&self, session: &Arc<Session>) {
        let slots: Vec<Arc<KeySlot>> = self.slots.lock().values().cloned().collect();
        let mut outcome = RebuildOutcome::default();
        let mut busy = Vec::new();

        for slot in slots {
            if let Ok(mut entry) = slot.entry.try_lock() {
                if !self.rebind(&slot, &mut entry, session, &mut outcome).await {
                    break;
                }
                continue;
            }
            busy.push(slot);
        }

        if !busy.is_empty() {
            trace!(count = busy.len(), "Rebinding busy keys");
        }
        for slot in busy {
            if outcome.aborted {
                break;
            }
            let mut entry = slot.entry.lock().await;
            if !self.rebind(&slot, &mut entry, session, &mut outcome).await {
                break;
            }
        }

        if outcome.rebuilt > 0 || outcome.failed > 0 {
            self.stats.rebuilds.fetch_add(1, Ordering::Relaxed);
            info!(
                generation = session.generation(),
                rebuilt = outcome.rebuilt,
                failed = outcome.failed,
                "Monitored items rebuilt"
            );
        }
    }

    /// Rebinds one key. Returns `false` once `session` is no longer usable.
    async fn rebind(
        &self,
        slot: &KeySlot,
        entry: &mut KeyEntry,
        session: &Arc<Session>,
        outcome: &mut RebuildOutcome,
    ) -> bool {
        if entry.retired || entry.refcount == 0 {
            return true;
        }
        if entry
            .item
            .as_ref()
            .map_or(false, |item| item.session.generation() == session.generation())
        {
            return true;
        }

        if let Some(stale) = entry.item.take() {
            stale.forwarder.abort();
            debug!(key = %slot.key, item_id = %stale.id, "Discarded item of a stale session");
        }

        if !self.supervisor.is_current(session) {
            outcome.aborted = true;
            return false;
        }

        match self.create_item(slot, session).await {
            Ok(item) => {
                entry.item = Some(item);
                outcome.rebuilt += 1;
                true
            }
            Err(error) => {
                outcome.failed += 1;
                outcome.aborted = error.is_session_fatal();
                !outcome.aborted
            }
        }
    }
}

#[derive(Debug, Default)]
struct RebuildOutcome {
    rebuilt: usize,
    failed: usize,
    aborted: bool,
}

impl<C: ProtocolClient> fmt::Debug for SubscriptionMultiplexer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("keys", &self.key_count())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Moves changes of one monitored item to the key's subscribers, in order.
async fn forward(
    key: SubscriptionKey,
    mut changes: mpsc::Receiver<DataValue>,
    fanout: Arc<Fanout>,
    stats: Arc<AtomicMultiplexerStats>,
) {
    while let Some(value) = changes.recv().await {
        let notification = Notification {
            key: key.clone(),
            value,
            received_at: Utc::now(),
        };
        trace!(key = %key, value = %notification.value.value, "Notification");
        fanout.deliver(&notification, &stats);
    }
    debug!(key = %key, "Monitored item feed ended");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::simulated::SimulatedClient;
    use crate::client::transport::Variant;
    use crate::types::{OpcUaConfig, StatusCode};
    use std::time::Duration;
    use uaql_core::BackoffPolicy;

    fn unstarted() -> (
        Arc<SimulatedClient>,
        Arc<SessionSupervisor<SimulatedClient>>,
        Arc<SubscriptionMultiplexer<SimulatedClient>>,
    ) {
        let client = Arc::new(SimulatedClient::with_demo_address_space());
        client.set_emit_initial_value(false);
        let config = OpcUaConfig::builder()
            .endpoint("opc.tcp://sim:4840")
            .request_timeout(Duration::from_millis(200))
            .reconnect(BackoffPolicy::fixed(Duration::from_millis(5)))
            .build()
            .unwrap();
        let supervisor = Arc::new(SessionSupervisor::new(Arc::clone(&client), config));
        let multiplexer = SubscriptionMultiplexer::new(Arc::clone(&supervisor));
        (client, supervisor, multiplexer)
    }

    async fn setup() -> (
        Arc<SimulatedClient>,
        Arc<SessionSupervisor<SimulatedClient>>,
        Arc<SubscriptionMultiplexer<SimulatedClient>>,
    ) {
        let (client, supervisor, multiplexer) = unstarted();
        supervisor.start().unwrap();
        (client, supervisor, multiplexer)
    }

    fn node(name: &str) -> NodeId {
        NodeId::string(2, name)
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        time::timeout(Duration::from_secs(2), async {
            while !condition() {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_shared_item_and_teardown() {
        let (client, supervisor, multiplexer) = setup().await;
        let a = node("Temperature");

        let mut s1 = multiplexer.subscribe(a.clone(), AttributeId::Value).await.unwrap();
        let mut s2 = multiplexer.subscribe(a.clone(), AttributeId::Value).await.unwrap();
        assert_ne!(s1.subscriber_id(), s2.subscriber_id());
        assert_eq!(client.stats().items_created, 1);
        assert_eq!(multiplexer.refcount(&a, AttributeId::Value).await, 2);

        client.set_value(&a, Variant::Double(40.0));
        assert_eq!(s1.recv().await.unwrap().value.value, Variant::Double(40.0));
        assert_eq!(s2.recv().await.unwrap().value.value, Variant::Double(40.0));

        assert!(multiplexer.unsubscribe(s1.subscriber_id()).await);
        assert!(multiplexer.has_monitored_item(&a, AttributeId::Value).await);
        assert_eq!(multiplexer.refcount(&a, AttributeId::Value).await, 1);
        assert_eq!(client.stats().terminations, 0);

        assert!(multiplexer.unsubscribe(s2.subscriber_id()).await);
        assert!(!multiplexer.has_monitored_item(&a, AttributeId::Value).await);
        assert_eq!(multiplexer.key_count(), 0);
        assert_eq!(client.stats().terminations, 1);

        assert!(!multiplexer.unsubscribe(s2.subscriber_id()).await);
        assert_eq!(client.stats().terminations, 1);

        multiplexer.shutdown().await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery_immediately() {
        let (client, supervisor, multiplexer) = setup().await;
        let a = node("Pressure");

        let mut s1 = multiplexer.subscribe(a.clone(), AttributeId::Value).await.unwrap();
        let mut s2 = multiplexer.subscribe(a.clone(), AttributeId::Value).await.unwrap();
        multiplexer.unsubscribe(s1.subscriber_id()).await;

        client.set_value(&a, Variant::Double(2.0));
        assert_eq!(s2.recv().await.unwrap().value.value, Variant::Double(2.0));
        assert!(s1.recv().await.is_none());

        multiplexer.shutdown().await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_subscriber_receives_every_notification() {
        let (client, supervisor, multiplexer) = setup().await;
        let a = node("Counter");
        let mut s1 = multiplexer.subscribe(a.clone(), AttributeId::Value).await.unwrap();

        for i in 1..=40u32 {
            client.set_value(&a, Variant::UInt32(i));
        }
        for i in 1..=40u32 {
            assert_eq!(s1.recv().await.unwrap().value.value, Variant::UInt32(i));
        }

        let stats = multiplexer.stats();
        assert_eq!(stats.notifications_delivered, 40);
        assert_eq!(stats.notifications_dropped, 0);

        multiplexer.shutdown().await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_abandoned_subscribe_leaves_no_slot() {
        let (client, supervisor, multiplexer) = unstarted();
        let a = node("Temperature");

        let pending = time::timeout(
            Duration::from_millis(50),
            multiplexer.subscribe(a.clone(), AttributeId::Value),
        )
        .await;
        assert!(pending.is_err());
        eventually(|| multiplexer.key_count() == 0).await;
        assert_eq!(multiplexer.subscriber_count(), 0);

        supervisor.start().unwrap();
        let mut s1 = multiplexer.subscribe(a.clone(), AttributeId::Value).await.unwrap();
        assert_eq!(multiplexer.refcount(&a, AttributeId::Value).await, 1);
        assert_eq!(client.stats().items_created, 1);

        client.set_value(&a, Variant::Double(7.0));
        assert_eq!(s1.recv().await.unwrap().value.value, Variant::Double(7.0));

        multiplexer.shutdown().await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_item_created_after_caller_left_is_terminated() {
        let (client, supervisor, multiplexer) = setup().await;
        supervisor.current_session().await.unwrap();
        client.set_item_delay(Duration::from_millis(50));

        let pending = time::timeout(
            Duration::from_millis(10),
            multiplexer.subscribe(node("Pressure"), AttributeId::Value),
        )
        .await;
        assert!(pending.is_err());

        eventually(|| client.stats().terminations == 1 && multiplexer.key_count() == 0).await;
        assert_eq!(client.stats().items_created, 1);
        assert_eq!(client.live_item_count(), 0);
        assert_eq!(multiplexer.subscriber_count(), 0);

        multiplexer.shutdown().await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_rebuild_passes_locked_slot() {
        let (client, supervisor, multiplexer) = setup().await;
        let a = node("Temperature");
        let mut s1 = multiplexer.subscribe(a.clone(), AttributeId::Value).await.unwrap();
        let first = supervisor.current_session().await.unwrap();

        let held = multiplexer.slot_for(&SubscriptionKey::new(node("Pressure"), AttributeId::Value));
        let guard = held.entry.lock().await;

        client.close_transport("test");
        eventually(|| {
            supervisor
                .try_current_session()
                .map_or(false, |session| session.generation() > first.generation())
        })
        .await;
        eventually(|| client.stats().items_created == 2).await;

        client.set_value(&a, Variant::Double(12.0));
        assert_eq!(s1.recv().await.unwrap().value.value, Variant::Double(12.0));

        drop(guard);
        multiplexer.remove_slot(&held);
        assert_eq!(multiplexer.key_count(), 1);

        multiplexer.shutdown().await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_creation_registers_nothing() {
        let (client, supervisor, multiplexer) = setup().await;

        let error = multiplexer
            .subscribe(node("Missing"), AttributeId::Value)
            .await
            .unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::BAD_NODE_ID_UNKNOWN));
        assert_eq!(multiplexer.key_count(), 0);
        assert_eq!(multiplexer.subscriber_count(), 0);
        assert_eq!(client.stats().items_created, 0);

        multiplexer.shutdown().await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_teardown_failure_is_not_surfaced() {
        let (client, supervisor, multiplexer) = setup().await;
        let s1 = multiplexer
            .subscribe(node("Counter"), AttributeId::Value)
            .await
            .unwrap();

        client.fail_next_terminations(1);
        assert!(multiplexer.unsubscribe(s1.subscriber_id()).await);
        assert_eq!(multiplexer.key_count(), 0);
        assert_eq!(multiplexer.stats().teardown_failures, 1);

        multiplexer.shutdown().await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_rebuild_after_recycle() {
        let (client, supervisor, multiplexer) = setup().await;
        let a = node("Temperature");

        let mut s1 = multiplexer.subscribe(a.clone(), AttributeId::Value).await.unwrap();
        let first = supervisor.current_session().await.unwrap();

        client.close_transport("test");
        let mut second = supervisor.current_session().await.unwrap();
        while second.generation() == first.generation() {
            time::sleep(Duration::from_millis(5)).await;
            second = supervisor.current_session().await.unwrap();
        }

        while client.stats().items_created < 2 {
            time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(client.live_item_count(), 1);

        client.set_value(&a, Variant::Double(50.0));
        assert_eq!(s1.recv().await.unwrap().value.value, Variant::Double(50.0));

        multiplexer.shutdown().await;
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_ends_streams() {
        let (client, supervisor, multiplexer) = setup().await;
        let mut s1 = multiplexer
            .subscribe(node("Temperature"), AttributeId::Value)
            .await
            .unwrap();

        multiplexer.shutdown().await;
        assert!(s1.recv().await.is_none());
        assert_eq!(client.live_item_count(), 0);
        assert!(multiplexer
            .subscribe(node("Temperature"), AttributeId::Value)
            .await
            .is_err());

        supervisor.shutdown().await;
    }
}
