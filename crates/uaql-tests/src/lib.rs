// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uaql Integration Tests
//!
//! Shared fixtures and a harness over the simulated client, plus the
//! integration suites under `tests/`.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p uaql-tests
//! cargo test -p uaql-tests --test integration_session
//! cargo test -p uaql-tests --test integration_subscription
//! cargo test -p uaql-tests --test integration_config
//! ```
//!
//! ## Test Categories
//!
//! ### Session Tests (`integration_session.rs`)
//! - Waiting for the first session and retrying failed connects
//! - Fatal and stale error reports
//! - Request timeouts while other requests are in flight
//!
//! ### Subscription Tests (`integration_subscription.rs`)
//! - One monitored item per key regardless of subscriber count
//! - Teardown on last unsubscribe
//! - Rebuild after recycle for live keys only
//!
//! ### Config Tests (`integration_config.rs`)
//! - Loading files and driving a session from the result
//!
//! ## Using the Harness
//!
//! ```rust,ignore
//! use uaql_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = SimHarness::demo().started();
//!     let session = harness.session().await;
//!     // ...
//!     harness.shutdown().await;
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::{init_test_logging, temp_test_dir};
}
