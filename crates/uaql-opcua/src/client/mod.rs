// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session supervision, one-shot requests and subscription multiplexing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   ┌──────────────────────────────────┐
//! │   AttributeReader    │   │     SubscriptionMultiplexer      │
//! │ read/write/call/     │   │ subscribe/unsubscribe, refcounts │
//! │ browse/poll          │   │ rebuild after recycle            │
//! └──────────────────────┘   └──────────────────────────────────┘
//!            │  current_session() / report_error()  │
//!            ▼                                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SessionSupervisor                       │
//! │        connect with backoff, watch<SessionState>            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              ProtocolClient (SimulatedClient, ...)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uaql_opcua::client::{AttributeReader, SessionSupervisor, SimulatedClient, SubscriptionMultiplexer};
//!
//! let client = Arc::new(SimulatedClient::with_demo_address_space());
//! let supervisor = Arc::new(SessionSupervisor::new(client, config));
//! supervisor.start()?;
//!
//! let reader = AttributeReader::new(Arc::clone(&supervisor));
//! let value = reader.read_value(&"ns=2;s=Temperature".parse()?).await?;
//!
//! let multiplexer = SubscriptionMultiplexer::new(Arc::clone(&supervisor));
//! let mut stream = multiplexer.subscribe("ns=2;s=Counter".parse()?, AttributeId::Value).await?;
//! while let Some(notification) = stream.recv().await {
//!     println!("{} = {}", notification.key, notification.value.value);
//! }
//! ```

mod poller;
mod reader;
mod session;
pub mod simulated;
mod subscription;
mod transport;

pub use poller::PollingSubscription;
pub use reader::{AttributeReader, Reference};
pub use session::{Session, SessionState, SessionStats, SessionSupervisor};
pub use simulated::{MethodHandler, RequestFault, SimulatedClient, SimulatedStats};
pub use subscription::{
    MultiplexerStats, Notification, NotificationStream, SubscriberId, SubscriptionMultiplexer,
};
pub use transport::{
    BrowseResult, CallResult, DataValue, MonitoredItemHandle, MonitoredItemId, ProtocolClient,
    ReadValueId, ReferenceDescription, SessionHandle, TransportEvent, Variant,
};
