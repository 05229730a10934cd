// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uaql-core
//!
//! Shared primitives used across the uaql crates:
//!
//! - **Retry**: [`BackoffPolicy`] and [`Backoff`] for reconnect loops
//! - **Bus**: [`PubSubBus`], a topic-keyed publish/subscribe bus for traffic
//!   that does not need monitored-item multiplexing
//! - **Error**: [`BusError`]
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use uaql_core::{Backoff, BackoffPolicy};
//!
//! let mut backoff = Backoff::new(BackoffPolicy::fixed(Duration::from_millis(10)));
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod bus;
pub mod error;
pub mod retry;

pub use bus::{BusStats, PubSubBus, TopicSubscriber};
pub use error::BusError;
pub use retry::{Backoff, BackoffPolicy, RetryDecision};
