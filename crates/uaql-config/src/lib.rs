// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uaql-config
//!
//! Configuration for the uaql service.
//!
//! - **Schema**: [`UaqlConfig`] wraps the client settings from `uaql-opcua`
//!   and adds watch points, logging and bus settings
//! - **Loader**: YAML, TOML and JSON files with `${VAR:default}` expansion
//!   and `UAQL_*` overrides
//!
//! ## Example
//!
//! ```rust
//! use uaql_config::{load_config_str, ConfigFormat};
//!
//! let config = load_config_str(
//!     r#"{"opcua": {"endpoint": "opc.tcp://localhost:4840"}}"#,
//!     ConfigFormat::Json,
//! ).unwrap();
//! assert!(config.watch.is_empty());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    default_config_paths, load_config, load_config_str, ConfigFormat, ConfigLoader,
    DEFAULT_ENV_PREFIX,
};
pub use schema::{
    BusConfig, LogFormat, LoggingConfig, LogLevel, UaqlConfig, WatchPoint, DEFAULT_BUS_CAPACITY,
};
