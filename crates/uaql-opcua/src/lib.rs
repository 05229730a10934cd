// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA session supervisor, subscription multiplexer and attribute reader.
//!
//! This crate shares one upstream OPC UA session between many concurrent
//! consumers. Consumers never handle reconnects themselves and never create
//! duplicate monitored items.
//!
//! # Features
//!
//! - Session supervision with configurable backoff (unlimited by default)
//! - Session-fatal error classification and recycling
//! - One-shot read/write/call/browse with a per-request timeout
//! - Reference-counted monitored items shared across subscribers
//! - Eager rebuild of wanted monitored items after every recycle
//! - Interval polling for servers without subscriptions
//! - An in-memory simulated client with failure injection
//!
//! # Error Handling
//!
//! ```text
//! OpcUaError
//! ├── Connection    - connect/handshake failures, closed transport, stopped supervisor
//! ├── Request       - failed or timed out read/write/call/browse
//! ├── Subscription  - monitored item creation and teardown failures
//! └── Configuration - invalid settings
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uaql_opcua::{AttributeReader, OpcUaConfig, SessionSupervisor, SimulatedClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OpcUaConfig::builder()
//!         .endpoint("opc.tcp://localhost:4840")
//!         .build()?;
//!
//!     let client = Arc::new(SimulatedClient::with_demo_address_space());
//!     let supervisor = Arc::new(SessionSupervisor::new(client, config));
//!     supervisor.start()?;
//!
//!     let reader = AttributeReader::new(Arc::clone(&supervisor));
//!     let value = reader.read_value(&"ns=2;s=Temperature".parse()?).await?;
//!     println!("Value: {}", value);
//!
//!     supervisor.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod types;

pub use error::{
    ConfigurationError, ConnectionError, ErrorClass, ErrorCode, ErrorSeverity, OpcUaError,
    OpcUaResult, Operation, RequestError, SubscriptionError,
};

pub use types::{
    AttributeId, BrowseDirection, BrowseFilter, MonitoringSettings, NodeClass, NodeId,
    NodeIdentifier, OpcUaConfig, OpcUaConfigBuilder, StatusCode, SubscriptionKey,
    SubscriptionSettings, TimestampsToReturn,
};

pub use client::{
    AttributeReader, DataValue, MultiplexerStats, Notification, NotificationStream,
    PollingSubscription, ProtocolClient, Reference, RequestFault, Session, SessionHandle,
    SessionState, SessionStats, SessionSupervisor, SimulatedClient, SubscriberId,
    SubscriptionMultiplexer, TransportEvent, Variant,
};
