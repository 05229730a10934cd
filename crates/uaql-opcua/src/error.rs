// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA error types and session-fatal classification.
//!
//! Every error produced against a session is eventually handed to
//! [`SessionSupervisor::report_error`](crate::client::SessionSupervisor::report_error),
//! which asks [`OpcUaError::classify`] whether the session that produced it is
//! still usable.
//!
//! # Error Categories
//!
//! ```text
//! OpcUaError
//! ├── Connection    - transport connect / handshake failures, closed transport
//! ├── Request       - read/write/call/browse failures and request timeouts
//! ├── Subscription  - monitored item creation and teardown failures
//! └── Configuration - invalid settings, node ids, attribute names
//! ```
//!
//! # Classification
//!
//! | Error                                             | Class         |
//! |---------------------------------------------------|---------------|
//! | request timed out                                 | SessionFatal  |
//! | `BadSessionClosed` / `BadSessionIdInvalid` status | SessionFatal  |
//! | `BadSessionNotActivated` status                   | SessionFatal  |
//! | transport closed / not connected during a request | SessionFatal  |
//! | anything else (bad node id, access denied, ...)   | Benign        |
//!
//! # Examples
//!
//! ```
//! use uaql_opcua::error::{ErrorClass, Operation, OpcUaError, RequestError};
//! use uaql_opcua::types::StatusCode;
//!
//! let error = OpcUaError::request(RequestError::failed(
//!     Operation::Read,
//!     "ns=2;s=Temperature",
//!     StatusCode::BAD_SESSION_CLOSED,
//! ));
//! assert_eq!(error.classify(), ErrorClass::SessionFatal);
//!
//! let error = OpcUaError::request(RequestError::failed(
//!     Operation::Read,
//!     "ns=2;s=Missing",
//!     StatusCode::BAD_NODE_ID_UNKNOWN,
//! ));
//! assert_eq!(error.classify(), ErrorClass::Benign);
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::types::StatusCode;

/// Result alias for OPC UA operations.
pub type OpcUaResult<T> = Result<T, OpcUaError>;

// =============================================================================
// OpcUaError - Main Error Type
// =============================================================================

/// The main error type for OPC UA operations.
#[derive(Debug, Clone, Error)]
pub enum OpcUaError {
    /// Connection-related errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Request-level errors.
    #[error("{0}")]
    Request(#[from] RequestError),

    /// Monitored item errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
}

impl OpcUaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a connection error.
    #[inline]
    pub fn connection(error: ConnectionError) -> Self {
        Self::Connection(error)
    }

    /// Creates a request error.
    #[inline]
    pub fn request(error: RequestError) -> Self {
        Self::Request(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Creates a not connected error.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    /// Creates a supervisor stopped error.
    pub fn supervisor_stopped() -> Self {
        Self::Connection(ConnectionError::SupervisorStopped)
    }

    /// Creates a request failed error carrying a server status.
    pub fn request_failed(
        operation: Operation,
        node_id: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self::Request(RequestError::failed(operation, node_id, status))
    }

    /// Creates a request timeout error.
    pub fn request_timeout(
        operation: Operation,
        node_id: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self::Request(RequestError::timed_out(operation, node_id, duration))
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Classifies this error against the session that produced it.
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::Request(RequestError::TimedOut { .. }) => ErrorClass::SessionFatal,
            Self::Request(RequestError::Failed { status, .. })
            | Self::Subscription(SubscriptionError::CreateFailed { status, .. })
                if status.is_session_invalid() =>
            {
                ErrorClass::SessionFatal
            }
            Self::Connection(ConnectionError::Closed { .. } | ConnectionError::NotConnected) => {
                ErrorClass::SessionFatal
            }
            _ => ErrorClass::Benign,
        }
    }

    /// Returns `true` if this error invalidates the session that produced it.
    #[inline]
    pub fn is_session_fatal(&self) -> bool {
        self.classify().is_session_fatal()
    }

    /// Returns the server status carried by this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Request(RequestError::Failed { status, .. })
            | Self::Subscription(SubscriptionError::CreateFailed { status, .. }) => Some(*status),
            Self::Request(RequestError::TimedOut { .. }) => Some(StatusCode::BAD_TIMEOUT),
            _ => None,
        }
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if repeating the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Request(e) => e.is_retryable(),
            Self::Subscription(_) => self.is_session_fatal(),
            Self::Configuration(_) => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection(ConnectionError::RetriesExhausted { .. }) => ErrorSeverity::Critical,
            Self::Connection(_) => ErrorSeverity::Warning,
            Self::Request(_) if self.is_session_fatal() => ErrorSeverity::Warning,
            Self::Request(_) => ErrorSeverity::Info,
            Self::Subscription(SubscriptionError::TeardownFailed { .. }) => ErrorSeverity::Warning,
            Self::Subscription(_) => ErrorSeverity::Error,
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Request(_) => "request",
            Self::Subscription(_) => "subscription",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection(e) => e.error_code(),
            Self::Request(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let code = self.error_code();
        let fatal = self.is_session_fatal();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                session_fatal = fatal,
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                session_fatal = fatal,
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                session_fatal = fatal,
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ErrorClass
// =============================================================================

/// Outcome of classifying an error against its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The session is unusable and must be recycled.
    SessionFatal,
    /// The failure is specific to one request.
    Benign,
}

impl ErrorClass {
    /// Returns `true` for [`ErrorClass::SessionFatal`].
    #[inline]
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::SessionFatal)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionFatal => write!(f, "session_fatal"),
            Self::Benign => write!(f, "benign"),
        }
    }
}

// =============================================================================
// Operation
// =============================================================================

/// The kind of request an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Attribute read.
    Read,
    /// Attribute write.
    Write,
    /// Method call.
    Call,
    /// Reference browse.
    Browse,
    /// Monitored item creation.
    CreateMonitoredItem,
    /// Monitored item termination.
    Terminate,
}

impl Operation {
    /// Returns the operation name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Call => "call",
            Self::Browse => "browse",
            Self::CreateMonitoredItem => "create_monitored_item",
            Self::Terminate => "terminate",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Transport and session establishment errors.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// Transport connect failed.
    #[error("Connection refused by '{endpoint}': {message}")]
    Refused {
        /// Target endpoint.
        endpoint: String,
        /// Failure detail.
        message: String,
    },

    /// Session creation/activation failed after the transport connected.
    #[error("Session handshake with '{endpoint}' failed: {message}")]
    HandshakeFailed {
        /// Target endpoint.
        endpoint: String,
        /// Failure detail.
        message: String,
    },

    /// The transport was closed.
    #[error("Connection closed{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed {
        /// Reason for closure.
        reason: Option<String>,
    },

    /// No transport connection.
    #[error("Not connected to OPC UA server")]
    NotConnected,

    /// The backoff policy gave up.
    #[error("Giving up on '{endpoint}' after {attempts} failed attempts")]
    RetriesExhausted {
        /// Target endpoint.
        endpoint: String,
        /// Number of failed attempts.
        attempts: u32,
    },

    /// The supervisor was shut down.
    #[error("Session supervisor stopped")]
    SupervisorStopped,

    /// The supervisor loop was started twice.
    #[error("Session supervisor is already running")]
    AlreadyRunning,
}

impl ConnectionError {
    /// Creates a connection refused error.
    pub fn refused(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a handshake failed error.
    pub fn handshake_failed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: Option<String>) -> Self {
        Self::Closed { reason }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(endpoint: impl Into<String>, attempts: u32) -> Self {
        Self::RetriesExhausted {
            endpoint: endpoint.into(),
            attempts,
        }
    }

    /// Returns `true` if the connection attempt may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Refused { .. } | Self::HandshakeFailed { .. } | Self::Closed { .. } | Self::NotConnected
        )
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Refused { .. } => 1,
            Self::HandshakeFailed { .. } => 2,
            Self::Closed { .. } => 3,
            Self::NotConnected => 4,
            Self::RetriesExhausted { .. } => 5,
            Self::SupervisorStopped => 6,
            Self::AlreadyRunning => 7,
        };
        ErrorCode::new(1, code)
    }
}

// =============================================================================
// RequestError
// =============================================================================

/// Failures of a single read/write/call/browse request.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// The server reported a bad status.
    #[error("{operation} on '{node_id}' failed: {status}")]
    Failed {
        /// Operation that failed.
        operation: Operation,
        /// Target node.
        node_id: String,
        /// Server-reported status.
        status: StatusCode,
    },

    /// The request did not complete in time.
    #[error("{operation} on '{node_id}' failed: Transaction has timed out after {duration:?}")]
    TimedOut {
        /// Operation that timed out.
        operation: Operation,
        /// Target node.
        node_id: String,
        /// Elapsed time.
        duration: Duration,
    },

    /// The request was malformed or the response could not be used.
    #[error("{operation} on '{node_id}' rejected: {message}")]
    Rejected {
        /// Operation that was rejected.
        operation: Operation,
        /// Target node.
        node_id: String,
        /// Detail.
        message: String,
    },
}

impl RequestError {
    /// Creates a request failed error.
    pub fn failed(operation: Operation, node_id: impl Into<String>, status: StatusCode) -> Self {
        Self::Failed {
            operation,
            node_id: node_id.into(),
            status,
        }
    }

    /// Creates a request timeout error.
    pub fn timed_out(operation: Operation, node_id: impl Into<String>, duration: Duration) -> Self {
        Self::TimedOut {
            operation,
            node_id: node_id.into(),
            duration,
        }
    }

    /// Creates a rejected request error.
    pub fn rejected(
        operation: Operation,
        node_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            operation,
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Returns the operation that failed.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Failed { operation, .. }
            | Self::TimedOut { operation, .. }
            | Self::Rejected { operation, .. } => *operation,
        }
    }

    /// Returns `true` if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Failed { status, .. } => status.is_session_invalid(),
            Self::TimedOut { .. } => true,
            Self::Rejected { .. } => false,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Failed { .. } => 1,
            Self::TimedOut { .. } => 2,
            Self::Rejected { .. } => 3,
        };
        ErrorCode::new(2, code)
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Monitored item errors.
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    /// The server refused to create the monitored item.
    #[error("Failed to create monitored item for '{key}': {status}")]
    CreateFailed {
        /// Subscription key (`node#attribute`).
        key: String,
        /// Server-reported status.
        status: StatusCode,
    },

    /// Terminating the monitored item failed.
    #[error("Failed to terminate monitored item for '{key}': {message}")]
    TeardownFailed {
        /// Subscription key (`node#attribute`).
        key: String,
        /// Failure detail.
        message: String,
    },

    /// The monitored item is not known to the server.
    #[error("Monitored item {item_id} not found")]
    UnknownItem {
        /// Item identifier.
        item_id: u32,
    },
}

impl SubscriptionError {
    /// Creates a creation failure.
    pub fn create_failed(key: impl fmt::Display, status: StatusCode) -> Self {
        Self::CreateFailed {
            key: key.to_string(),
            status,
        }
    }

    /// Creates a teardown failure.
    pub fn teardown_failed(key: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::TeardownFailed {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::CreateFailed { .. } => 1,
            Self::TeardownFailed { .. } => 2,
            Self::UnknownItem { .. } => 3,
        };
        ErrorCode::new(3, code)
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Invalid configuration or input.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// Required field missing.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidEndpoint {
        /// The invalid URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// Invalid node id string.
    #[error("Invalid node id '{node_id}': {reason}")]
    InvalidNodeId {
        /// The invalid node id.
        node_id: String,
        /// Reason.
        reason: String,
    },

    /// Unknown attribute name.
    #[error("Unknown attribute '{name}'")]
    InvalidAttribute {
        /// The attribute name.
        name: String,
    },

    /// Field value out of range.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Reason.
        reason: String,
    },
}

impl ConfigurationError {
    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid node id error.
    pub fn invalid_node_id(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid attribute error.
    pub fn invalid_attribute(name: impl Into<String>) -> Self {
        Self::InvalidAttribute { name: name.into() }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::MissingField { .. } => 1,
            Self::InvalidEndpoint { .. } => 2,
            Self::InvalidNodeId { .. } => 3,
            Self::InvalidAttribute { .. } => 4,
            Self::InvalidValue { .. } => 5,
        };
        ErrorCode::new(4, code)
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, no action required.
    Info,
    /// Warning, action may be required.
    Warning,
    /// Error, action required but recoverable.
    Error,
    /// Critical, immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::DEBUG,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code.
///
/// Format: `UA-XXYY` where XX is category and YY is specific error.
///
/// Categories: 1 connection, 2 request, 3 subscription, 4 configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_session_fatal() {
        let error = OpcUaError::request_timeout(
            Operation::Read,
            "ns=2;s=A",
            Duration::from_secs(10),
        );
        assert_eq!(error.classify(), ErrorClass::SessionFatal);
        assert!(error.to_string().contains("Transaction has timed out"));
        assert_eq!(error.status(), Some(StatusCode::BAD_TIMEOUT));
    }

    #[test]
    fn test_bad_session_statuses_are_fatal() {
        for status in [
            StatusCode::BAD_SESSION_CLOSED,
            StatusCode::BAD_SESSION_ID_INVALID,
            StatusCode::BAD_SESSION_NOT_ACTIVATED,
        ] {
            let error = OpcUaError::request_failed(Operation::Write, "ns=2;s=A", status);
            assert!(error.is_session_fatal(), "{status}");
        }

        let error = OpcUaError::subscription(SubscriptionError::create_failed(
            "ns=2;s=A#Value",
            StatusCode::BAD_SESSION_CLOSED,
        ));
        assert!(error.is_session_fatal());
    }

    #[test]
    fn test_request_level_statuses_are_benign() {
        for status in [
            StatusCode::BAD_NODE_ID_UNKNOWN,
            StatusCode::BAD_USER_ACCESS_DENIED,
            StatusCode::BAD_NOT_WRITABLE,
            StatusCode::BAD_TYPE_MISMATCH,
        ] {
            let error = OpcUaError::request_failed(Operation::Read, "ns=2;s=A", status);
            assert_eq!(error.classify(), ErrorClass::Benign, "{status}");
            assert_eq!(error.status(), Some(status));
        }
    }

    #[test]
    fn test_connection_loss_is_fatal_but_stop_is_not() {
        assert!(OpcUaError::not_connected().is_session_fatal());
        assert!(OpcUaError::connection(ConnectionError::closed(None)).is_session_fatal());
        assert!(!OpcUaError::supervisor_stopped().is_session_fatal());
        assert!(!OpcUaError::connection(ConnectionError::refused("opc.tcp://x:4840", "down"))
            .is_session_fatal());
    }

    #[test]
    fn test_teardown_failure_is_benign() {
        let error = OpcUaError::subscription(SubscriptionError::teardown_failed(
            "ns=2;s=A#Value",
            "BadMonitoredItemIdInvalid",
        ));
        assert_eq!(error.classify(), ErrorClass::Benign);
        assert_eq!(error.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_error_codes() {
        let error = OpcUaError::connection(ConnectionError::retries_exhausted("opc.tcp://x", 3));
        assert_eq!(error.error_code().to_string(), "UA-0105");
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert_eq!(error.category(), "connection");

        let error = OpcUaError::request_failed(Operation::Call, "m", StatusCode::BAD_METHOD_INVALID);
        assert_eq!(error.error_code().to_string(), "UA-0201");
    }

    #[test]
    fn test_display() {
        let error =
            OpcUaError::request_failed(Operation::Read, "ns=2;s=A", StatusCode::BAD_NODE_ID_UNKNOWN);
        assert_eq!(
            error.to_string(),
            "read on 'ns=2;s=A' failed: BadNodeIdUnknown (0x80340000)"
        );

        let closed = ConnectionError::closed(Some("socket reset".into()));
        assert_eq!(closed.to_string(), "Connection closed: socket reset");
        assert_eq!(ConnectionError::closed(None).to_string(), "Connection closed");
    }
}
