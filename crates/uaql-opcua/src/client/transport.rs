// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol client abstraction.
//!
//! [`ProtocolClient`] is the seam between the session supervisor and whatever
//! library speaks the OPC UA wire protocol. Everything above this trait works
//! in terms of session handles, [`DataValue`]s and monitored item handles.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::error::OpcUaResult;
use crate::types::{
    AttributeId, BrowseFilter, MonitoringSettings, NodeClass, NodeId, StatusCode,
    SubscriptionKey, SubscriptionSettings,
};

// =============================================================================
// SessionHandle
// =============================================================================

/// Server-side session as returned by [`ProtocolClient::create_session`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    /// Server-assigned session id.
    pub id: NodeId,

    /// Session name sent to the server.
    pub name: String,

    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

impl SessionHandle {
    /// Creates a handle stamped with the current time.
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// TransportEvent
// =============================================================================

/// Unsolicited transport-level events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection to the server was closed.
    Closed {
        /// Reason given by the transport, if any.
        reason: Option<String>,
    },

    /// A request was abandoned by the transport because it timed out.
    TimedOutRequest {
        /// Handle of the timed out request.
        request_handle: u32,
    },
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed { reason: Some(reason) } => write!(f, "transport closed: {}", reason),
            Self::Closed { reason: None } => write!(f, "transport closed"),
            Self::TimedOutRequest { request_handle } => {
                write!(f, "request {} timed out", request_handle)
            }
        }
    }
}

// =============================================================================
// Variant
// =============================================================================

/// OPC UA scalar or array value.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum Variant {
    /// Boolean value.
    Boolean(bool),

    /// 32-bit signed integer.
    Int32(i32),

    /// 32-bit unsigned integer.
    UInt32(u32),

    /// 64-bit signed integer.
    Int64(i64),

    /// 64-bit unsigned integer.
    UInt64(u64),

    /// 32-bit float.
    Float(f32),

    /// 64-bit double.
    Double(f64),

    /// String value.
    String(String),

    /// Date/time value.
    DateTime(DateTime<Utc>),

    /// Node id value.
    NodeId(NodeId),

    /// Byte string.
    ByteString(Vec<u8>),

    /// Array of values.
    Array(Vec<Variant>),

    /// Null value.
    #[default]
    Null,
}

impl Variant {
    /// Returns the OPC UA built-in type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "Boolean",
            Self::Int32(_) => "Int32",
            Self::UInt32(_) => "UInt32",
            Self::Int64(_) => "Int64",
            Self::UInt64(_) => "UInt64",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::NodeId(_) => "NodeId",
            Self::ByteString(_) => "ByteString",
            Self::Array(_) => "Array",
            Self::Null => "Null",
        }
    }

    /// Returns `true` if both values carry the same built-in type.
    pub fn same_type(&self, other: &Variant) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attempts to get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            Self::Int32(v) => Some(*v != 0),
            Self::UInt32(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Attempts to get the value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Boolean(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            Self::Float(v) => Some(*v as i64),
            Self::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Attempts to get the value as an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::UInt32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get the value as a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::NodeId(v) => write!(f, "{}", v),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Self::Array(v) => write!(f, "[{} items]", v.len()),
            Self::Null => write!(f, "null"),
        }
    }
}

macro_rules! impl_variant_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_variant_from! {
    bool => Boolean,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => String,
    NodeId => NodeId,
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A value together with its status and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataValue {
    /// The value.
    pub value: Variant,

    /// Status of the value.
    pub status: StatusCode,

    /// Timestamp assigned by the data source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<DateTime<Utc>>,

    /// Timestamp assigned by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a good value stamped with the current time.
    pub fn good(value: impl Into<Variant>) -> Self {
        let now = Utc::now();
        Self {
            value: value.into(),
            status: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    /// Creates a value-less result carrying a status.
    pub fn bad(status: StatusCode) -> Self {
        Self {
            value: Variant::Null,
            status,
            source_timestamp: None,
            server_timestamp: Some(Utc::now()),
        }
    }

    /// Returns `true` if the status is good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.status.is_good()
    }

    /// Returns `true` if the status is bad.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.status.is_bad()
    }
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// One entry of a read request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadValueId {
    /// Node to read.
    pub node_id: NodeId,

    /// Attribute to read.
    pub attribute: AttributeId,
}

impl ReadValueId {
    /// Creates a read entry.
    pub fn new(node_id: NodeId, attribute: AttributeId) -> Self {
        Self { node_id, attribute }
    }
}

/// A reference returned by browsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceDescription {
    /// Reference type.
    pub reference_type_id: NodeId,

    /// `true` for a forward reference.
    pub is_forward: bool,

    /// Target node.
    pub node_id: NodeId,

    /// Target browse name.
    pub browse_name: String,

    /// Target display name.
    pub display_name: String,

    /// Target node class.
    pub node_class: NodeClass,

    /// Target type definition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_definition: Option<NodeId>,
}

/// Result of a browse request.
#[derive(Debug, Clone, Default)]
pub struct BrowseResult {
    /// Status of the browse.
    pub status: StatusCode,

    /// References that passed the filter.
    pub references: Vec<ReferenceDescription>,
}

/// Result of a method call.
#[derive(Debug, Clone, Default)]
pub struct CallResult {
    /// Status of the call.
    pub status: StatusCode,

    /// Per-argument validation results.
    pub input_argument_results: Vec<StatusCode>,

    /// Output arguments.
    pub output_arguments: Vec<Variant>,
}

impl CallResult {
    /// Creates a successful result.
    pub fn good(output_arguments: Vec<Variant>) -> Self {
        Self {
            status: StatusCode::GOOD,
            input_argument_results: Vec::new(),
            output_arguments,
        }
    }

    /// Creates a failed result.
    pub fn bad(status: StatusCode) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

// =============================================================================
// Monitored Items
// =============================================================================

/// Server-assigned monitored item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MonitoredItemId(pub u32);

impl fmt::Display for MonitoredItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A created monitored item and its change feed.
///
/// The feed ends when the server side of the item goes away.
#[derive(Debug)]
pub struct MonitoredItemHandle {
    /// Item id, used for [`ProtocolClient::terminate`].
    pub id: MonitoredItemId,

    /// Change notifications in server order.
    pub changes: mpsc::Receiver<DataValue>,
}

// =============================================================================
// ProtocolClient Trait
// =============================================================================

/// Low-level OPC UA client operations.
///
/// Implementations own the transport and hand out [`SessionHandle`]s. They
/// must be `Send + Sync` since the supervisor, reader and multiplexer share a
/// single client across tasks.
#[async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    // =========================================================================
    // Connection Management
    // =========================================================================

    /// Subscribes to unsolicited transport events.
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Opens the transport connection to `endpoint`.
    async fn connect(&self, endpoint: &str) -> OpcUaResult<()>;

    /// Closes the transport connection.
    async fn disconnect(&self) -> OpcUaResult<()>;

    /// Creates and activates a session on the open connection.
    async fn create_session(&self, name: &str) -> OpcUaResult<SessionHandle>;

    /// Closes a session.
    async fn close_session(&self, session: &SessionHandle) -> OpcUaResult<()>;

    // =========================================================================
    // Requests
    // =========================================================================

    /// Reads attributes in a single request. Results are in request order.
    async fn read(
        &self,
        session: &SessionHandle,
        nodes: &[ReadValueId],
    ) -> OpcUaResult<Vec<DataValue>>;

    /// Writes one attribute and returns the server status.
    async fn write(
        &self,
        session: &SessionHandle,
        node_id: &NodeId,
        attribute: AttributeId,
        value: Variant,
    ) -> OpcUaResult<StatusCode>;

    /// Calls a method on an object.
    async fn call(
        &self,
        session: &SessionHandle,
        object_id: &NodeId,
        method_id: &NodeId,
        arguments: Vec<Variant>,
    ) -> OpcUaResult<CallResult>;

    /// Browses the references of a node.
    async fn browse(
        &self,
        session: &SessionHandle,
        node_id: &NodeId,
        filter: &BrowseFilter,
    ) -> OpcUaResult<BrowseResult>;

    // =========================================================================
    // Monitored Items
    // =========================================================================

    /// Creates a monitored item for `key`.
    async fn create_monitored_item(
        &self,
        session: &SessionHandle,
        key: &SubscriptionKey,
        subscription: &SubscriptionSettings,
        monitoring: &MonitoringSettings,
    ) -> OpcUaResult<MonitoredItemHandle>;

    /// Deletes a monitored item.
    async fn terminate(&self, session: &SessionHandle, item: MonitoredItemId) -> OpcUaResult<()>;

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Returns the client display name for logging.
    fn display_name(&self) -> String;
}

// =============================================================================
// Tests
// =============================================================================
