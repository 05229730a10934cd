// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use std::time::Duration;

use uaql_config::UaqlConfig;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

const FAST_POLL: Duration = Duration::from_millis(100);

/// Loads and validates the configuration file, then prints a summary.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;

    if !config_path.exists() {
        return Err(BinError::config(format!(
            "Configuration file not found: {}",
            config_path.display()
        )));
    }

    let config = uaql_config::load_config(config_path)
        .map_err(|e| BinError::from(e).with_context("Configuration validation failed"))?;
    let warnings = collect_warnings(&config);

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Endpoint:        {}", config.opcua.endpoint);
            println!("  Session name:    {}", config.opcua.effective_session_name());
            println!("  Request timeout: {:?}", config.opcua.request_timeout);
            println!("  Reconnect:       {}", config.opcua.reconnect);
            println!(
                "  Watch points:    {} subscribed, {} polled",
                config.subscribed_points().count(),
                config.polled_points().count()
            );
            println!(
                "  Logging:         {} ({})",
                config.logging.level, config.logging.format
            );

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config)
                        .unwrap_or_else(|_| "(serialization error)".to_string())
                );
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": {
                    "endpoint": config.opcua.endpoint,
                    "session_name": config.opcua.effective_session_name(),
                    "subscribed_points": config.subscribed_points().count(),
                    "polled_points": config.polled_points().count(),
                },
                "warnings": warnings,
                "config": if args.show_config { Some(&config) } else { None },
            });
            let rendered = serde_json::to_string_pretty(&output)
                .map_err(|e| BinError::runtime(e.to_string()))?;
            println!("{}", rendered);
        }
    }

    Ok(())
}

/// Non-fatal issues worth pointing out.
pub(crate) fn collect_warnings(config: &UaqlConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.watch.is_empty() {
        warnings.push("No watch points configured; `run` will only hold the session".to_string());
    }

    for point in config.polled_points() {
        if matches!(point.poll_interval, Some(interval) if interval < FAST_POLL) {
            warnings.push(format!(
                "Watch point {} polls faster than {:?}",
                point.display_name(),
                FAST_POLL
            ));
        }
    }

    if config.opcua.reconnect.max_retries.is_some() {
        warnings.push(
            "Reconnect retries are limited; the supervisor stops once they run out".to_string(),
        );
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use uaql_config::WatchPoint;
    use uaql_core::BackoffPolicy;
    use uaql_opcua::{NodeId, OpcUaConfig};

    #[test]
    fn test_collect_warnings() {
        let mut config = UaqlConfig {
            opcua: OpcUaConfig::new("opc.tcp://localhost:4840"),
            ..Default::default()
        };
        assert_eq!(collect_warnings(&config).len(), 1);

        config.watch.push(WatchPoint {
            poll_interval: Some(Duration::from_millis(10)),
            ..WatchPoint::new(NodeId::string(2, "Counter"))
        });
        config.opcua.reconnect = BackoffPolicy::default().with_max_retries(3);
        let warnings = collect_warnings(&config);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("ns=2;s=Counter"));
    }
}
