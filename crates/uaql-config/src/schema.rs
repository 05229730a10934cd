// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions.
//!
//! # Example
//!
//! ```yaml
//! opcua:
//!   endpoint: "opc.tcp://localhost:4840"
//!   request_timeout: 5s
//!   reconnect:
//!     initial_delay: 500
//!     max_delay: 30000
//!
//! watch:
//!   - node_id: "ns=2;s=Temperature"
//!   - node_id: "ns=2;s=Pressure"
//!     attribute: Value
//!   - node_id: "ns=2;s=Counter"
//!     poll_interval: 2s
//!
//! logging:
//!   level: info
//!   format: json
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uaql_opcua::{AttributeId, NodeId, OpcUaConfig, SubscriptionKey};

use crate::error::{ConfigError, ConfigResult};

/// Default capacity of the notification bus.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

// =============================================================================
// UaqlConfig
// =============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UaqlConfig {
    /// Client and session settings.
    pub opcua: OpcUaConfig,

    /// Points the `run` command subscribes to.
    #[serde(default)]
    pub watch: Vec<WatchPoint>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Notification bus settings.
    #[serde(default)]
    pub bus: BusConfig,
}

impl UaqlConfig {
    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.opcua
            .validate()
            .map_err(|e| ConfigError::validation("opcua", e.to_string()))?;

        let mut seen = HashMap::new();
        for (i, point) in self.watch.iter().enumerate() {
            point.validate(i)?;
            if let Some(first) = seen.insert(point.key(), i) {
                return Err(ConfigError::duplicate_watch_point(point.key().to_string(), first, i));
            }
        }

        if self.bus.capacity == 0 {
            return Err(ConfigError::validation(
                "bus.capacity",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Watch points delivered through monitored items.
    pub fn subscribed_points(&self) -> impl Iterator<Item = &WatchPoint> {
        self.watch.iter().filter(|p| p.poll_interval.is_none())
    }

    /// Watch points delivered through interval reads.
    pub fn polled_points(&self) -> impl Iterator<Item = &WatchPoint> {
        self.watch.iter().filter(|p| p.poll_interval.is_some())
    }
}

// =============================================================================
// WatchPoint
// =============================================================================

/// A node attribute to observe.
///
/// Points without a `poll_interval` are subscribed through the multiplexer;
/// points with one are read on that interval instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchPoint {
    /// Node to observe.
    pub node_id: NodeId,

    /// Attribute to observe.
    #[serde(default)]
    pub attribute: AttributeId,

    /// Optional label used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Read on this interval instead of subscribing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "humantime_option")]
    pub poll_interval: Option<Duration>,
}

impl WatchPoint {
    /// Creates a subscribed watch point for the value attribute.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            attribute: AttributeId::Value,
            label: None,
            poll_interval: None,
        }
    }

    /// Returns the subscription key for this point.
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.node_id.clone(), self.attribute)
    }

    /// Returns the label, falling back to the node id.
    pub fn display_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.node_id.to_string())
    }

    fn validate(&self, index: usize) -> ConfigResult<()> {
        if self.node_id.is_null() {
            return Err(ConfigError::validation(
                format!("watch[{}].node_id", index),
                "null node id cannot be watched",
            ));
        }
        if matches!(self.poll_interval, Some(interval) if interval.is_zero()) {
            return Err(ConfigError::validation(
                format!("watch[{}].poll_interval", index),
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// LoggingConfig
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Log output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-field lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
    /// Abbreviated single-line output.
    Compact,
}

impl LogFormat {
    /// Returns the format name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

// =============================================================================
// BusConfig
// =============================================================================

/// Notification bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-topic buffer capacity.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_bus_capacity() -> usize {
    DEFAULT_BUS_CAPACITY
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

mod humantime_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => {
                serializer.serialize_str(&humantime::format_duration(*duration).to_string())
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> UaqlConfig {
        UaqlConfig {
            opcua: OpcUaConfig::new("opc.tcp://localhost:4840"),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_needs_endpoint() {
        let err = UaqlConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "opcua"));
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_duplicate_watch_point_rejected() {
        let mut config = base();
        let node: NodeId = "ns=2;s=Temperature".parse().unwrap();
        config.watch.push(WatchPoint::new(node.clone()));
        config.watch.push(WatchPoint {
            attribute: AttributeId::DisplayName,
            ..WatchPoint::new(node.clone())
        });
        assert!(config.validate().is_ok());

        config.watch.push(WatchPoint::new(node));
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateWatchPoint { first: 0, duplicate: 2, .. }
        ));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = base();
        config.watch.push(WatchPoint {
            poll_interval: Some(Duration::ZERO),
            ..WatchPoint::new(NodeId::numeric(2, 7))
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("watch[0].poll_interval"));
    }

    #[test]
    fn test_points_split_by_delivery() {
        let mut config = base();
        config.watch.push(WatchPoint::new(NodeId::numeric(2, 1)));
        config.watch.push(WatchPoint {
            poll_interval: Some(Duration::from_secs(1)),
            ..WatchPoint::new(NodeId::numeric(2, 2))
        });
        assert_eq!(config.subscribed_points().count(), 1);
        assert_eq!(config.polled_points().count(), 1);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_watch_point_display_name() {
        let mut point = WatchPoint::new(NodeId::string(2, "Pressure"));
        assert_eq!(point.display_name(), "ns=2;s=Pressure");
        point.label = Some("pressure".to_string());
        assert_eq!(point.display_name(), "pressure");
    }
}
