// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration error types for uaql-config.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but its content could not be decoded.
    #[error("{path}: cannot parse configuration: {message}")]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// A field holds a value the client cannot run with.
    #[error("invalid `{field}`: {message}")]
    Validation {
        /// Dotted path of the field, e.g. `watch[2].poll_interval`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Reading the file failed.
    #[error("{path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Two watch points share a node and attribute.
    #[error("watch[{duplicate}] repeats {key} from watch[{first}]")]
    DuplicateWatchPoint {
        /// The repeated subscription key.
        key: String,
        /// Index of the first occurrence.
        first: usize,
        /// Index of the repeat.
        duplicate: usize,
    },

    /// A `UAQL_*` override could not be applied.
    #[error("environment override {name} is invalid: {message}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Why the value was rejected.
        message: String,
    },

    /// No file at the given path.
    #[error("configuration file {path} does not exist")]
    FileNotFound {
        /// Path that was tried.
        path: PathBuf,
    },

    /// The extension is not yaml, yml, toml or json.
    #[error("unsupported configuration format '{format}' (expected yaml, toml or json)")]
    UnsupportedFormat {
        /// Extension or format name.
        format: String,
    },

    /// Decoding content that did not come from a file.
    #[error("cannot decode configuration: {message}")]
    Serialization {
        /// Decoder message.
        message: String,
    },
}

impl ConfigError {
    /// Creates a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a duplicate watch point error.
    pub fn duplicate_watch_point(key: impl Into<String>, first: usize, duplicate: usize) -> Self {
        Self::DuplicateWatchPoint {
            key: key.into(),
            first,
            duplicate,
        }
    }

    /// Creates an invalid override error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a missing file error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an unsupported format error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Creates a decoding error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` if the error was caused by the file system rather than
    /// the file's content.
    pub fn is_file_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::FileNotFound { .. })
    }
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::validation("opcua.endpoint", "must not be empty");
        assert_eq!(err.to_string(), "invalid `opcua.endpoint`: must not be empty");

        let err = ConfigError::duplicate_watch_point("ns=2;s=A#Value", 0, 3);
        assert_eq!(err.to_string(), "watch[3] repeats ns=2;s=A#Value from watch[0]");
    }

    #[test]
    fn test_is_file_error() {
        assert!(ConfigError::file_not_found("/nope.yaml").is_file_error());
        assert!(!ConfigError::serialization("bad").is_file_error());
        assert!(!ConfigError::unsupported_format("ini").is_file_error());
    }
}
