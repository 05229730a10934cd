// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the uaql binary.
//!
//! Every error maps to a process exit code:
//!
//! | Code | Meaning                                       |
//! |------|-----------------------------------------------|
//! | 1    | configuration could not be loaded or is invalid |
//! | 2    | logging or runtime setup failed               |
//! | 3    | the runtime stopped abnormally                |
//! | 4    | I/O failure                                   |
//! | 5    | the server rejected a request                 |
//! | 6    | the session was lost during a request         |
//! | 64   | bad command line input                        |

use thiserror::Error;
use uaql_config::ConfigError;
use uaql_opcua::OpcUaError;

/// Result type alias for uaql-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that can occur in the uaql binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration rejected outside the loader.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Logging or runtime setup failed.
    #[error("Startup failed: {0}")]
    Initialization(String),

    /// The runtime stopped abnormally.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid command line input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Loading the configuration file failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A client operation failed.
    #[error("{0}")]
    OpcUa(#[from] OpcUaError),

    /// Error with context.
    #[error("{context}: {source}")]
    WithContext {
        /// What was being done.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a startup error.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Creates a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Wraps `self` with a description of what was being done.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping context layers.
    pub fn root(&self) -> &BinError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the process exit code.
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            Self::Configuration(_) | Self::Config(_) => 1,
            Self::Initialization(_) => 2,
            Self::Runtime(_) => 3,
            Self::Io(_) => 4,
            Self::OpcUa(e) if e.is_session_fatal() => 6,
            Self::OpcUa(_) => 5,
            Self::InvalidArgument(_) => 64,
            Self::WithContext { .. } => 3,
        }
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Prints an error and its cause chain to stderr.
///
/// Client errors also print their `UA-XXYY` code and the server status.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);

    if let BinError::OpcUa(client) = error.root() {
        match client.status() {
            Some(status) => eprintln!("  Code: {} ({})", client.error_code(), status),
            None => eprintln!("  Code: {}", client.error_code()),
        }
    }

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }
}

/// Reports `error` and exits with its code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}
