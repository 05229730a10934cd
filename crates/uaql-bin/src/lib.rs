// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uaql-bin
//!
//! The `uaql` binary:
//!
//! - CLI argument parsing with clap
//! - Service runtime wiring the supervisor, reader and multiplexer
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Logging initialization
//! - One-shot `read` and `browse` commands
//!
//! ## Usage
//!
//! ```bash
//! # Subscribe to the configured watch points (default command)
//! uaql -c uaql.yaml
//!
//! # Validate configuration
//! uaql validate
//!
//! # Read attributes of a node
//! uaql read "ns=2;s=Temperature" -a Value -a DisplayName
//!
//! # Browse the Objects folder
//! uaql browse i=85
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{RuntimeBuilder, RuntimeSummary, ServiceRuntime, VALUE_TOPIC};
pub use shutdown::{ShutdownCoordinator, ShutdownReason, ShutdownToken};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
