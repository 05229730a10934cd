// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Logging and tracing initialization.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uaql_config::{LogFormat, LogLevel};

use crate::error::{BinError, BinResult};

// =============================================================================
// Logging Initialization
// =============================================================================

/// Initializes the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: LogLevel, format: LogFormat) -> BinResult<()> {
    let filter = build_filter(level)?;

    let result = match format {
        LogFormat::Text => {
            let is_terminal = std::io::IsTerminal::is_terminal(&std::io::stdout());
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(is_terminal),
                )
                .try_init()
        }
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Compact => {
            let is_terminal = std::io::IsTerminal::is_terminal(&std::io::stdout());
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_ansi(is_terminal),
                )
                .try_init()
        }
    };

    result.map_err(|e| BinError::init(format!("Failed to install log subscriber: {}", e)))
}

/// Builds the filter from `RUST_LOG` or `level`.
pub fn build_filter(level: LogLevel) -> BinResult<EnvFilter> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level.as_str())
            .map_err(|e| BinError::init(format!("Invalid log filter: {}", e)))?,
    };

    let directive = "tokio=info"
        .parse()
        .map_err(|e| BinError::init(format!("Invalid log directive: {}", e)))?;
    Ok(filter.add_directive(directive))
}

/// Returns a human-readable description of log levels.
pub fn log_level_help() -> &'static str {
    r#"Log levels (from most to least verbose):
  trace  - Every notification and request
  debug  - Subscriber and monitored item lifecycle
  info   - Session transitions and rebuilds (default)
  warn   - Retries, fatal reports and teardown failures
  error  - Errors only"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter() {
        let filter = build_filter(LogLevel::Debug).unwrap();
        assert!(filter.to_string().contains("tokio=info"));
    }

    #[test]
    fn test_help_lists_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_help().contains(level));
        }
    }
}
