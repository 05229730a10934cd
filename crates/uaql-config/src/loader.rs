// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading and processing.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Expand `${VAR}` / `${VAR:default}` placeholders in the raw text
//! 3. Parse YAML, TOML or JSON into [`UaqlConfig`]
//! 4. Apply `UAQL_*` environment overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! UAQL_OPCUA_ENDPOINT=opc.tcp://plc-7:4840
//! UAQL_OPCUA_REQUEST_TIMEOUT=5s
//! UAQL_OPCUA_MAX_RETRIES=10
//! UAQL_LOG_LEVEL=debug
//! UAQL_LOG_FORMAT=json
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::UaqlConfig;

/// Default prefix for environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "UAQL";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader.
///
/// # Examples
///
/// ```no_run
/// use uaql_config::loader::ConfigLoader;
///
/// let loader = ConfigLoader::new();
/// let config = loader.load("uaql.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to expand placeholders and apply overrides.
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a new configuration loader with default settings.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads configuration from a file.
    ///
    /// The format is determined by the extension: `.yaml`/`.yml`, `.toml`
    /// or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<UaqlConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let mut config = self.parse_content(&content, format, path)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;

        info!(endpoint = %config.opcua.endpoint, "Configuration loaded successfully");
        debug!(
            "Loaded {} watch points ({} polled)",
            config.watch.len(),
            config.polled_points().count()
        );

        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<UaqlConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };
        let mut config = parse_str(&content, format)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    fn parse_content(
        &self,
        content: &str,
        format: ConfigFormat,
        path: &Path,
    ) -> ConfigResult<UaqlConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        parse_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })
    }

    /// Expands `${VAR_NAME}` and `${VAR_NAME:default}` placeholders.
    ///
    /// Unset variables without a default are left in place.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut chars = content.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' || chars.peek() != Some(&'{') {
                result.push(c);
                continue;
            }
            chars.next();

            let mut var_content = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '}' {
                    found_close = true;
                    break;
                }
                var_content.push(c);
            }

            if !found_close {
                result.push_str("${");
                result.push_str(&var_content);
                continue;
            }

            let (var_name, default_value) = match var_content.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (var_content.as_str(), None),
            };

            match (env::var(var_name), default_value) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(default)) => result.push_str(default),
                (Err(_), None) => {
                    warn!("Environment variable not found: {}", var_name);
                    result.push_str("${");
                    result.push_str(&var_content);
                    result.push('}');
                }
            }
        }

        result
    }

    /// Applies `{prefix}_*` environment overrides.
    fn apply_env_overrides(&self, config: &mut UaqlConfig) -> ConfigResult<()> {
        let var = |suffix: &str| {
            let name = format!("{}_{}", self.env_prefix, suffix);
            env::var(&name).ok().map(|value| (name, value))
        };

        if let Some((_, value)) = var("OPCUA_ENDPOINT") {
            config.opcua.endpoint = value;
        }
        if let Some((_, value)) = var("OPCUA_SESSION_NAME") {
            config.opcua.session_name = Some(value);
        }
        if let Some((name, value)) = var("OPCUA_REQUEST_TIMEOUT") {
            config.opcua.request_timeout = humantime::parse_duration(&value)
                .map_err(|e| ConfigError::invalid_env_var(name, e.to_string()))?;
        }
        if let Some((name, value)) = var("OPCUA_MAX_RETRIES") {
            config.opcua.reconnect.max_retries = match value.to_lowercase().as_str() {
                "" | "unlimited" | "none" => None,
                _ => Some(value.parse().map_err(|_| {
                    ConfigError::invalid_env_var(name, "expected a number or 'unlimited'")
                })?),
            };
        }

        if let Some((name, value)) = var("LOG_LEVEL") {
            config.logging.level = value
                .parse()
                .map_err(|e: String| ConfigError::invalid_env_var(name, e))?;
        }
        if let Some((name, value)) = var("LOG_FORMAT") {
            config.logging.format = value
                .parse()
                .map_err(|e: String| ConfigError::invalid_env_var(name, e))?;
        }

        if let Some((name, value)) = var("BUS_CAPACITY") {
            config.bus.capacity = value
                .parse()
                .map_err(|_| ConfigError::invalid_env_var(name, "expected valid number"))?;
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => yaml_parse(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML goes through the `config` crate.
fn yaml_parse<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<UaqlConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with default settings.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<UaqlConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

/// Default configuration file locations, in search order.
pub fn default_config_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("uaql.yaml"),
        PathBuf::from("uaql.yml"),
        PathBuf::from("uaql.toml"),
        PathBuf::from("config/uaql.yaml"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LogFormat, LogLevel};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use uaql_opcua::AttributeId;

    const YAML: &str = r#"
opcua:
  endpoint: "opc.tcp://localhost:4840"
  request_timeout: 5s
  reconnect:
    max_retries: 3
    initial_delay: 100

watch:
  - node_id: "ns=2;s=Temperature"
  - node_id: "ns=2;s=Device"
    attribute: DisplayName
  - node_id: "ns=2;s=Counter"
    poll_interval: 250ms

logging:
  level: debug
  format: compact
"#;

    fn write_temp(content: &str, suffix: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn isolated(prefix: &str) -> ConfigLoader {
        ConfigLoader::new().with_env_prefix(prefix)
    }

    #[test]
    fn test_load_yaml_file() {
        let file = write_temp(YAML, ".yaml");
        let config = isolated("UAQL_T_YAML").load(file.path()).unwrap();

        assert_eq!(config.opcua.endpoint, "opc.tcp://localhost:4840");
        assert_eq!(config.opcua.request_timeout, Duration::from_secs(5));
        assert_eq!(config.opcua.reconnect.max_retries, Some(3));
        assert_eq!(config.opcua.reconnect.initial_delay, Duration::from_millis(100));
        assert_eq!(config.watch.len(), 3);
        assert_eq!(config.watch[1].attribute, AttributeId::DisplayName);
        assert_eq!(config.watch[2].poll_interval, Some(Duration::from_millis(250)));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_load_toml_and_json() {
        let toml = r#"
[opcua]
endpoint = "opc.tcp://plc:4840"

[[watch]]
node_id = "i=2258"
"#;
        let config = isolated("UAQL_T_TOML")
            .load_from_str(toml, ConfigFormat::Toml)
            .unwrap();
        assert_eq!(config.watch[0].node_id.as_numeric(), Some(2258));

        let json = r#"{"opcua": {"endpoint": "opc.tcp://plc:4840"}, "bus": {"capacity": 8}}"#;
        let config = isolated("UAQL_T_JSON")
            .load_from_str(json, ConfigFormat::Json)
            .unwrap();
        assert_eq!(config.bus.capacity, 8);
        assert!(config.watch.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_temp(YAML, ".ini");
        let err = isolated("UAQL_T_INI").load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_parse_error_carries_path() {
        let file = write_temp("{ not json", ".json");
        let err = isolated("UAQL_T_BADJSON").load(file.path()).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, file.path()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_placeholders() {
        env::set_var("UAQL_T_PH_HOST", "plc-9");
        let loader = isolated("UAQL_T_PH");
        let resolved = loader.resolve_env_placeholders(
            "opc.tcp://${UAQL_T_PH_HOST}:${UAQL_T_PH_PORT:4840} ${UAQL_T_PH_UNSET} ${open",
        );
        assert_eq!(
            resolved,
            "opc.tcp://plc-9:4840 ${UAQL_T_PH_UNSET} ${open"
        );
        env::remove_var("UAQL_T_PH_HOST");
    }

    #[test]
    fn test_placeholder_default_with_colon() {
        let loader = isolated("UAQL_T_PHC");
        let content = r#"{"opcua": {"endpoint": "${UAQL_T_PHC_EP:opc.tcp://fallback:4840}"}}"#;
        let config = loader.load_from_str(content, ConfigFormat::Json).unwrap();
        assert_eq!(config.opcua.endpoint, "opc.tcp://fallback:4840");
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("UAQL_T_OVR_OPCUA_ENDPOINT", "opc.tcp://override:4840");
        env::set_var("UAQL_T_OVR_OPCUA_REQUEST_TIMEOUT", "750ms");
        env::set_var("UAQL_T_OVR_OPCUA_MAX_RETRIES", "unlimited");
        env::set_var("UAQL_T_OVR_LOG_FORMAT", "json");

        let config = isolated("UAQL_T_OVR")
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap();
        assert_eq!(config.opcua.endpoint, "opc.tcp://override:4840");
        assert_eq!(config.opcua.request_timeout, Duration::from_millis(750));
        assert_eq!(config.opcua.reconnect.max_retries, None);
        assert_eq!(config.logging.format, LogFormat::Json);

        for name in [
            "UAQL_T_OVR_OPCUA_ENDPOINT",
            "UAQL_T_OVR_OPCUA_REQUEST_TIMEOUT",
            "UAQL_T_OVR_OPCUA_MAX_RETRIES",
            "UAQL_T_OVR_LOG_FORMAT",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_invalid_env_override() {
        env::set_var("UAQL_T_BAD_BUS_CAPACITY", "lots");
        let err = isolated("UAQL_T_BAD")
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref name, .. } if name == "UAQL_T_BAD_BUS_CAPACITY"));
        env::remove_var("UAQL_T_BAD_BUS_CAPACITY");
    }

    #[test]
    fn test_env_resolution_disabled() {
        env::set_var("UAQL_T_OFF_OPCUA_ENDPOINT", "opc.tcp://ignored:4840");
        let config = isolated("UAQL_T_OFF")
            .with_env_vars(false)
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap();
        assert_eq!(config.opcua.endpoint, "opc.tcp://localhost:4840");
        env::remove_var("UAQL_T_OFF_OPCUA_ENDPOINT");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.YML")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert!(ConfigFormat::from_path(Path::new("a")).is_err());
    }
}
