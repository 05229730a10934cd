// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory [`ProtocolClient`] with a small address space.
//!
//! Used by the `uaql run` command and by tests. Values written through
//! [`SimulatedClient::set_value`] (or the `write` request) are pushed to the
//! monitored items watching them. Failures can be injected per call:
//!
//! - connect and session creation failures ([`fail_next_connects`](SimulatedClient::fail_next_connects),
//!   [`fail_next_sessions`](SimulatedClient::fail_next_sessions))
//! - request faults ([`inject_request_fault`](SimulatedClient::inject_request_fault))
//! - monitored item creation and termination failures
//! - transport close and server-side session expiry

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::client::transport::{
    BrowseResult, CallResult, DataValue, MonitoredItemHandle, MonitoredItemId, ProtocolClient,
    ReadValueId, ReferenceDescription, SessionHandle, TransportEvent, Variant,
};
use crate::error::{
    ConnectionError, OpcUaError, OpcUaResult, Operation, RequestError, SubscriptionError,
};
use crate::types::{
    AttributeId, BrowseFilter, MonitoringSettings, NodeClass, NodeId, StatusCode,
    SubscriptionKey, SubscriptionSettings,
};

const EVENT_CAPACITY: usize = 64;
const ITEM_QUEUE: usize = 64;

/// Method implementation: input arguments to output arguments or a status.
pub type MethodHandler = Arc<dyn Fn(&[Variant]) -> Result<Vec<Variant>, StatusCode> + Send + Sync>;

// =============================================================================
// Faults
// =============================================================================

/// A fault applied to the next read, write, call or browse request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFault {
    /// Fail with the given status.
    Status(StatusCode),
    /// Fail with a transaction timeout and emit `TimedOutRequest`.
    Timeout,
    /// Never answer.
    Hang,
    /// Close the transport while the request is in flight.
    Closed,
}

/// Counters of calls made against the simulated server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulatedStats {
    /// `connect` calls.
    pub connect_attempts: u64,
    /// Sessions created.
    pub sessions_created: u64,
    /// Sessions closed by the client.
    pub sessions_closed: u64,
    /// Read/write/call/browse requests.
    pub requests: u64,
    /// Monitored items created.
    pub items_created: u64,
    /// `terminate` calls.
    pub terminations: u64,
    /// `disconnect` calls.
    pub disconnects: u64,
}

// =============================================================================
// Address Space
// =============================================================================

#[derive(Debug, Clone)]
struct SimReference {
    reference_type_id: NodeId,
    target: NodeId,
    is_forward: bool,
}

#[derive(Debug, Clone)]
struct SimNode {
    browse_name: String,
    display_name: String,
    node_class: NodeClass,
    value: Option<DataValue>,
    writable: bool,
    references: Vec<SimReference>,
}

impl SimNode {
    fn new(name: &str, node_class: NodeClass) -> Self {
        Self {
            browse_name: name.to_string(),
            display_name: name.to_string(),
            node_class,
            value: None,
            writable: false,
            references: Vec::new(),
        }
    }

    fn attribute(&self, node_id: &NodeId, attribute: AttributeId) -> DataValue {
        match attribute {
            AttributeId::NodeId => DataValue::good(node_id.clone()),
            AttributeId::NodeClass => DataValue::good(self.node_class.value() as i32),
            AttributeId::BrowseName => DataValue::good(self.browse_name.clone()),
            AttributeId::DisplayName => DataValue::good(self.display_name.clone()),
            AttributeId::Value => match &self.value {
                Some(value) => value.clone(),
                None => DataValue::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
            },
            AttributeId::AccessLevel if self.value.is_some() => {
                DataValue::good(if self.writable { 3u32 } else { 1u32 })
            }
            _ => DataValue::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
        }
    }
}

#[derive(Debug)]
struct SimItem {
    session: NodeId,
    key: SubscriptionKey,
    sender: mpsc::Sender<DataValue>,
}

#[derive(Default)]
struct SimState {
    connected: bool,
    sessions: HashSet<NodeId>,
    nodes: HashMap<NodeId, SimNode>,
    methods: HashMap<NodeId, MethodHandler>,
    items: HashMap<MonitoredItemId, SimItem>,
    next_item_id: u32,
    next_request_handle: u32,

    connect_failures: u32,
    session_failures: u32,
    request_faults: VecDeque<RequestFault>,
    item_failures: VecDeque<StatusCode>,
    termination_failures: u32,
    disconnect_failures: u32,
    item_delay: Duration,
    request_delay: Duration,
    emit_initial_value: bool,

    stats: SimulatedStats,
}

impl SimState {
    fn push_change(&mut self, node_id: &NodeId, value: &DataValue) {
        self.items.retain(|id, item| {
            if item.key.node_id != *node_id || item.key.attribute != AttributeId::Value {
                return true;
            }
            match item.sender.try_send(value.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(item_id = %id, "Simulated item queue full");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    fn drop_sessions(&mut self) {
        self.sessions.clear();
        self.items.clear();
    }

    fn check_session(&self, session: &SessionHandle, operation: Operation, node: &str) -> OpcUaResult<()> {
        if !self.connected {
            return Err(OpcUaError::connection(ConnectionError::closed(None)));
        }
        if !self.sessions.contains(&session.id) {
            return Err(OpcUaError::request_failed(
                operation,
                node,
                StatusCode::BAD_SESSION_CLOSED,
            ));
        }
        Ok(())
    }
}

// =============================================================================
// SimulatedClient
// =============================================================================

/// In-memory OPC UA server and client.
pub struct SimulatedClient {
    state: Mutex<SimState>,
    events: broadcast::Sender<TransportEvent>,
}

impl Default for SimulatedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedClient {
    /// Creates a client whose address space holds only the standard folders.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut state = SimState {
            emit_initial_value: true,
            ..Default::default()
        };

        state
            .nodes
            .insert(NodeId::ROOT_FOLDER, SimNode::new("Root", NodeClass::Object));
        state
            .nodes
            .insert(NodeId::OBJECTS_FOLDER, SimNode::new("Objects", NodeClass::Object));
        link(&mut state, &NodeId::ROOT_FOLDER, &NodeId::ORGANIZES, &NodeId::OBJECTS_FOLDER);

        Self {
            state: Mutex::new(state),
            events,
        }
    }

    /// Creates a client with a demo device under the Objects folder.
    ///
    /// ```text
    /// Objects
    /// └── ns=2;s=Device
    ///     ├── ns=2;s=Temperature   Double  21.5   writable
    ///     ├── ns=2;s=Pressure      Double  1.013  writable
    ///     ├── ns=2;s=Counter       UInt32  0
    ///     ├── ns=2;s=DeviceName    String  "uaql-sim"
    ///     └── ns=2;s=Device.Add    method (a, b) -> a + b
    /// ```
    pub fn with_demo_address_space() -> Self {
        let client = Self::new();
        let device = NodeId::string(2, "Device");
        client.add_object(&NodeId::OBJECTS_FOLDER, device.clone(), "Device");
        client.add_variable(&device, NodeId::string(2, "Temperature"), "Temperature", Variant::Double(21.5), true);
        client.add_variable(&device, NodeId::string(2, "Pressure"), "Pressure", Variant::Double(1.013), true);
        client.add_variable(&device, NodeId::string(2, "Counter"), "Counter", Variant::UInt32(0), false);
        client.add_variable(&device, NodeId::string(2, "DeviceName"), "DeviceName", Variant::from("uaql-sim"), false);
        client.add_method(
            &device,
            NodeId::string(2, "Device.Add"),
            "Add",
            Arc::new(|args: &[Variant]| match args {
                [a, b] => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => Ok(vec![Variant::Double(a + b)]),
                    _ => Err(StatusCode::BAD_TYPE_MISMATCH),
                },
                _ => Err(StatusCode::BAD_ARGUMENTS_MISSING),
            }),
        );
        client
    }

    // =========================================================================
    // Address Space Setup
    // =========================================================================

    /// Adds an object organized under `parent`.
    pub fn add_object(&self, parent: &NodeId, node_id: NodeId, name: &str) {
        let mut state = self.state.lock();
        state.nodes.insert(node_id.clone(), SimNode::new(name, NodeClass::Object));
        link(&mut state, parent, &NodeId::ORGANIZES, &node_id);
    }

    /// Adds a variable as a component of `parent`.
    pub fn add_variable(&self, parent: &NodeId, node_id: NodeId, name: &str, value: Variant, writable: bool) {
        let mut state = self.state.lock();
        let mut node = SimNode::new(name, NodeClass::Variable);
        node.value = Some(DataValue::good(value));
        node.writable = writable;
        state.nodes.insert(node_id.clone(), node);
        link(&mut state, parent, &NodeId::HAS_COMPONENT, &node_id);
    }

    /// Adds a method as a component of `parent`.
    pub fn add_method(&self, parent: &NodeId, method_id: NodeId, name: &str, handler: MethodHandler) {
        let mut state = self.state.lock();
        state.nodes.insert(method_id.clone(), SimNode::new(name, NodeClass::Method));
        state.methods.insert(method_id.clone(), handler);
        link(&mut state, parent, &NodeId::HAS_COMPONENT, &method_id);
    }

    /// Sets a variable's value and notifies monitored items.
    ///
    /// Returns `false` if the node is not a variable.
    pub fn set_value(&self, node_id: &NodeId, value: Variant) -> bool {
        let mut state = self.state.lock();
        let data = DataValue::good(value);
        match state.nodes.get_mut(node_id) {
            Some(node) if node.value.is_some() => node.value = Some(data.clone()),
            _ => return false,
        }
        state.push_change(node_id, &data);
        true
    }

    /// Returns a variable's current value.
    pub fn value(&self, node_id: &NodeId) -> Option<Variant> {
        let state = self.state.lock();
        state
            .nodes
            .get(node_id)
            .and_then(|node| node.value.as_ref())
            .map(|data| data.value.clone())
    }

    /// Advances the demo device: bumps the counter and drifts the temperature.
    pub fn advance(&self) {
        let counter = NodeId::string(2, "Counter");
        let temperature = NodeId::string(2, "Temperature");

        if let Some(Variant::UInt32(count)) = self.value(&counter) {
            let next = count.wrapping_add(1);
            self.set_value(&counter, Variant::UInt32(next));

            if let Some(current) = self.value(&temperature).and_then(|v| v.as_f64()) {
                let drift = if next % 2 == 0 { 0.25 } else { -0.125 };
                self.set_value(&temperature, Variant::Double(current + drift));
            }
        }
    }

    // =========================================================================
    // Failure Injection
    // =========================================================================

    /// Makes the next `count` connects fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    /// Makes the next `count` session creations fail.
    pub fn fail_next_sessions(&self, count: u32) {
        self.state.lock().session_failures = count;
    }

    /// Queues a fault for the next request.
    pub fn inject_request_fault(&self, fault: RequestFault) {
        self.state.lock().request_faults.push_back(fault);
    }

    /// Makes the next monitored item creation fail with `status`.
    pub fn fail_next_item_creation(&self, status: StatusCode) {
        self.state.lock().item_failures.push_back(status);
    }

    /// Makes the next `count` terminations fail.
    pub fn fail_next_terminations(&self, count: u32) {
        self.state.lock().termination_failures = count;
    }

    /// Makes the next `count` disconnects report an error. The link is
    /// dropped regardless.
    pub fn fail_next_disconnects(&self, count: u32) {
        self.state.lock().disconnect_failures = count;
    }

    /// Delays every monitored item creation by `delay`.
    pub fn set_item_delay(&self, delay: Duration) {
        self.state.lock().item_delay = delay;
    }

    /// Delays every request by `delay`.
    pub fn set_request_delay(&self, delay: Duration) {
        self.state.lock().request_delay = delay;
    }

    /// Controls whether new monitored items start with the current value.
    pub fn set_emit_initial_value(&self, emit: bool) {
        self.state.lock().emit_initial_value = emit;
    }

    /// Drops the connection and all sessions, and emits `Closed`.
    pub fn close_transport(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            state.connected = false;
            state.drop_sessions();
        }
        debug!(reason, "Simulated transport closed");
        let _ = self.events.send(TransportEvent::Closed {
            reason: Some(reason.to_string()),
        });
    }

    /// Invalidates all sessions on the server side, keeping the connection.
    pub fn expire_sessions(&self) {
        self.state.lock().drop_sessions();
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Returns the call counters.
    pub fn stats(&self) -> SimulatedStats {
        self.state.lock().stats
    }

    /// Returns the number of live monitored items.
    pub fn live_item_count(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns `true` while the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    // =========================================================================
    // Request Plumbing
    // =========================================================================

    /// Applies delay and faults, then checks the session.
    async fn begin_request(
        &self,
        session: &SessionHandle,
        operation: Operation,
        node: &str,
    ) -> OpcUaResult<()> {
        let (delay, fault) = {
            let mut state = self.state.lock();
            state.stats.requests += 1;
            (state.request_delay, state.request_faults.pop_front())
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match fault {
            None => {}
            Some(RequestFault::Status(status)) => {
                return Err(OpcUaError::request_failed(operation, node, status));
            }
            Some(RequestFault::Timeout) => {
                let request_handle = {
                    let mut state = self.state.lock();
                    state.next_request_handle += 1;
                    state.next_request_handle
                };
                let _ = self.events.send(TransportEvent::TimedOutRequest { request_handle });
                return Err(OpcUaError::request(RequestError::timed_out(
                    operation,
                    node,
                    Duration::ZERO,
                )));
            }
            Some(RequestFault::Hang) => {
                std::future::pending::<()>().await;
            }
            Some(RequestFault::Closed) => {
                self.close_transport("connection reset during request");
                return Err(OpcUaError::connection(ConnectionError::closed(Some(
                    "connection reset during request".to_string(),
                ))));
            }
        }

        self.state.lock().check_session(session, operation, node)
    }
}

fn link(state: &mut SimState, source: &NodeId, reference_type_id: &NodeId, target: &NodeId) {
    if let Some(node) = state.nodes.get_mut(source) {
        node.references.push(SimReference {
            reference_type_id: reference_type_id.clone(),
            target: target.clone(),
            is_forward: true,
        });
    }
    if let Some(node) = state.nodes.get_mut(target) {
        node.references.push(SimReference {
            reference_type_id: reference_type_id.clone(),
            target: source.clone(),
            is_forward: false,
        });
    }
}

fn is_hierarchical(reference_type_id: &NodeId) -> bool {
    *reference_type_id == NodeId::ORGANIZES
        || *reference_type_id == NodeId::HAS_COMPONENT
        || *reference_type_id == NodeId::HAS_PROPERTY
}

fn reference_matches(filter: &BrowseFilter, reference_type_id: &NodeId) -> bool {
    match &filter.reference_type_id {
        None => true,
        Some(wanted) if wanted == reference_type_id => true,
        Some(wanted) => {
            filter.include_subtypes
                && *wanted == NodeId::HIERARCHICAL_REFERENCES
                && is_hierarchical(reference_type_id)
        }
    }
}

#[async_trait]
impl ProtocolClient for SimulatedClient {
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn connect(&self, endpoint: &str) -> OpcUaResult<()> {
        let mut state = self.state.lock();
        state.stats.connect_attempts += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(OpcUaError::connection(ConnectionError::refused(
                endpoint,
                "connection refused",
            )));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> OpcUaResult<()> {
        let mut state = self.state.lock();
        state.stats.disconnects += 1;
        state.connected = false;
        state.drop_sessions();
        if state.disconnect_failures > 0 {
            state.disconnect_failures -= 1;
            return Err(OpcUaError::connection(ConnectionError::closed(Some(
                "BadSecureChannelClosed".to_string(),
            ))));
        }
        Ok(())
    }

    async fn create_session(&self, name: &str) -> OpcUaResult<SessionHandle> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(OpcUaError::not_connected());
        }
        if state.session_failures > 0 {
            state.session_failures -= 1;
            return Err(OpcUaError::connection(ConnectionError::handshake_failed(
                "simulated",
                "BadUserAccessDenied",
            )));
        }

        let handle = SessionHandle::new(NodeId::guid(1, Uuid::new_v4()), name);
        state.sessions.insert(handle.id.clone());
        state.stats.sessions_created += 1;
        Ok(handle)
    }

    async fn close_session(&self, session: &SessionHandle) -> OpcUaResult<()> {
        let mut state = self.state.lock();
        if !state.sessions.remove(&session.id) {
            return Err(OpcUaError::request_failed(
                Operation::Read,
                session.id.to_string(),
                StatusCode::BAD_SESSION_ID_INVALID,
            ));
        }
        state.items.retain(|_, item| item.session != session.id);
        state.stats.sessions_closed += 1;
        Ok(())
    }

    async fn read(&self, session: &SessionHandle, nodes: &[ReadValueId]) -> OpcUaResult<Vec<DataValue>> {
        let label = nodes
            .first()
            .map(|n| n.node_id.to_string())
            .unwrap_or_default();
        self.begin_request(session, Operation::Read, &label).await?;

        let state = self.state.lock();
        Ok(nodes
            .iter()
            .map(|request| match state.nodes.get(&request.node_id) {
                Some(node) => node.attribute(&request.node_id, request.attribute),
                None => DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN),
            })
            .collect())
    }

    async fn write(
        &self,
        session: &SessionHandle,
        node_id: &NodeId,
        attribute: AttributeId,
        value: Variant,
    ) -> OpcUaResult<StatusCode> {
        self.begin_request(session, Operation::Write, &node_id.to_string())
            .await?;

        let mut state = self.state.lock();
        let data = {
            let Some(node) = state.nodes.get_mut(node_id) else {
                return Ok(StatusCode::BAD_NODE_ID_UNKNOWN);
            };
            if attribute != AttributeId::Value || !node.writable {
                return Ok(StatusCode::BAD_NOT_WRITABLE);
            }
            match &node.value {
                Some(current) if !current.value.same_type(&value) => {
                    return Ok(StatusCode::BAD_TYPE_MISMATCH);
                }
                _ => {}
            }
            let data = DataValue::good(value);
            node.value = Some(data.clone());
            data
        };
        state.push_change(node_id, &data);
        Ok(StatusCode::GOOD)
    }

    async fn call(
        &self,
        session: &SessionHandle,
        object_id: &NodeId,
        method_id: &NodeId,
        arguments: Vec<Variant>,
    ) -> OpcUaResult<CallResult> {
        self.begin_request(session, Operation::Call, &method_id.to_string())
            .await?;

        let handler = {
            let state = self.state.lock();
            if !state.nodes.contains_key(object_id) {
                return Ok(CallResult::bad(StatusCode::BAD_NODE_ID_UNKNOWN));
            }
            state.methods.get(method_id).cloned()
        };

        Ok(match handler {
            None => CallResult::bad(StatusCode::BAD_METHOD_INVALID),
            Some(handler) => match handler(&arguments) {
                Ok(outputs) => CallResult::good(outputs),
                Err(status) => CallResult::bad(status),
            },
        })
    }

    async fn browse(
        &self,
        session: &SessionHandle,
        node_id: &NodeId,
        filter: &BrowseFilter,
    ) -> OpcUaResult<BrowseResult> {
        self.begin_request(session, Operation::Browse, &node_id.to_string())
            .await?;

        let state = self.state.lock();
        let Some(node) = state.nodes.get(node_id) else {
            return Ok(BrowseResult {
                status: StatusCode::BAD_NODE_ID_UNKNOWN,
                references: Vec::new(),
            });
        };

        let references = node
            .references
            .iter()
            .filter(|r| filter.direction.accepts(r.is_forward))
            .filter(|r| reference_matches(filter, &r.reference_type_id))
            .filter_map(|r| {
                let target = state.nodes.get(&r.target)?;
                filter.accepts_class(target.node_class).then(|| ReferenceDescription {
                    reference_type_id: r.reference_type_id.clone(),
                    is_forward: r.is_forward,
                    node_id: r.target.clone(),
                    browse_name: target.browse_name.clone(),
                    display_name: target.display_name.clone(),
                    node_class: target.node_class,
                    type_definition: None,
                })
            })
            .collect();

        Ok(BrowseResult {
            status: StatusCode::GOOD,
            references,
        })
    }

    async fn create_monitored_item(
        &self,
        session: &SessionHandle,
        key: &SubscriptionKey,
        _subscription: &SubscriptionSettings,
        monitoring: &MonitoringSettings,
    ) -> OpcUaResult<MonitoredItemHandle> {
        let delay = self.state.lock().item_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.check_session(session, Operation::CreateMonitoredItem, &key.to_string())?;

        if let Some(status) = state.item_failures.pop_front() {
            return Err(OpcUaError::subscription(SubscriptionError::create_failed(key, status)));
        }

        let initial = match state.nodes.get(&key.node_id) {
            Some(node) => node.attribute(&key.node_id, key.attribute),
            None => {
                return Err(OpcUaError::subscription(SubscriptionError::create_failed(
                    key,
                    StatusCode::BAD_NODE_ID_UNKNOWN,
                )))
            }
        };
        if initial.is_bad() {
            return Err(OpcUaError::subscription(SubscriptionError::create_failed(
                key,
                initial.status,
            )));
        }

        let (sender, changes) = mpsc::channel(ITEM_QUEUE.max(monitoring.queue_size as usize));
        if state.emit_initial_value {
            let _ = sender.try_send(initial);
        }

        state.next_item_id += 1;
        let id = MonitoredItemId(state.next_item_id);
        state.items.insert(
            id,
            SimItem {
                session: session.id.clone(),
                key: key.clone(),
                sender,
            },
        );
        state.stats.items_created += 1;
        Ok(MonitoredItemHandle { id, changes })
    }

    async fn terminate(&self, session: &SessionHandle, item: MonitoredItemId) -> OpcUaResult<()> {
        let mut state = self.state.lock();
        state.stats.terminations += 1;
        state.check_session(session, Operation::Terminate, &item.to_string())?;

        if state.termination_failures > 0 {
            state.termination_failures -= 1;
            return Err(OpcUaError::request_failed(
                Operation::Terminate,
                item.to_string(),
                StatusCode::BAD_INTERNAL_ERROR,
            ));
        }

        match state.items.remove(&item) {
            Some(_) => Ok(()),
            None => Err(OpcUaError::request_failed(
                Operation::Terminate,
                item.to_string(),
                StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
            )),
        }
    }

    fn display_name(&self) -> String {
        "simulated".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn session(client: &SimulatedClient) -> SessionHandle {
        client.connect("opc.tcp://sim:4840").await.unwrap();
        client.create_session("test").await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_failures_are_counted() {
        let client = SimulatedClient::new();
        client.fail_next_connects(2);

        assert!(client.connect("opc.tcp://sim").await.is_err());
        assert!(client.connect("opc.tcp://sim").await.is_err());
        assert!(client.connect("opc.tcp://sim").await.is_ok());
        assert_eq!(client.stats().connect_attempts, 3);
    }

    #[tokio::test]
    async fn test_session_requires_connection() {
        let client = SimulatedClient::new();
        assert!(client.create_session("test").await.is_err());

        client.connect("opc.tcp://sim").await.unwrap();
        client.fail_next_sessions(1);
        assert!(client.create_session("test").await.is_err());
        assert!(client.create_session("test").await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_session_is_session_fatal() {
        let client = SimulatedClient::with_demo_address_space();
        let handle = session(&client).await;
        client.expire_sessions();

        let error = client
            .read(&handle, &[ReadValueId::new(NodeId::string(2, "Counter"), AttributeId::Value)])
            .await
            .unwrap_err();
        assert!(error.is_session_fatal());
    }

    #[tokio::test]
    async fn test_monitored_item_receives_changes() {
        let client = SimulatedClient::with_demo_address_space();
        let handle = session(&client).await;
        let key = SubscriptionKey::value(NodeId::string(2, "Counter"));

        let mut item = client
            .create_monitored_item(
                &handle,
                &key,
                &SubscriptionSettings::default(),
                &MonitoringSettings::default(),
            )
            .await
            .unwrap();
        assert_eq!(item.changes.recv().await.unwrap().value, Variant::UInt32(0));

        client.advance();
        assert_eq!(item.changes.recv().await.unwrap().value, Variant::UInt32(1));

        client.terminate(&handle, item.id).await.unwrap();
        assert!(item.changes.recv().await.is_none());
        assert!(client.terminate(&handle, item.id).await.is_err());
    }

    #[tokio::test]
    async fn test_close_transport_emits_event() {
        let client = SimulatedClient::with_demo_address_space();
        let _handle = session(&client).await;
        let mut events = client.subscribe_events();

        client.close_transport("cable pulled");
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Closed {
                reason: Some("cable pulled".into())
            }
        );
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_browse_inverse() {
        let client = SimulatedClient::with_demo_address_space();
        let handle = session(&client).await;

        let filter = BrowseFilter::new().direction(crate::types::BrowseDirection::Inverse);
        let result = client
            .browse(&handle, &NodeId::string(2, "Temperature"), &filter)
            .await
            .unwrap();
        assert_eq!(result.references.len(), 1);
        assert_eq!(result.references[0].node_id, NodeId::string(2, "Device"));
        assert!(!result.references[0].is_forward);
    }
}
