// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: Supervise a session and stream the configured watch points (default)
//! - `validate`: Validate configuration file
//! - `read`: Read attributes of one node
//! - `browse`: List the references of one node
//! - `version`: Show version information

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use uaql_config::{LogFormat, LogLevel};
use uaql_opcua::BrowseDirection;

// =============================================================================
// Main CLI Structure
// =============================================================================

/// uaql - one supervised OPC UA session shared by many readers and subscribers
#[derive(Parser, Debug)]
#[command(
    name = "uaql",
    author = "Sylvex <contact@sylvex.io>",
    version = crate::VERSION,
    about = "Session supervision and subscription fan-out over a single OPC UA connection",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "uaql.yaml",
        env = "UAQL_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, env = "UAQL_LOG_LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Log format (text, json, compact); overrides the config file
    #[arg(long, env = "UAQL_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Enable quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Supervise the session and stream the configured watch points
    ///
    /// This is the default command when no subcommand is specified.
    Run(RunArgs),

    /// Validate the configuration file
    Validate(ValidateArgs),

    /// Read attributes of a node
    Read(ReadArgs),

    /// Browse the references of a node
    Browse(BrowseArgs),

    /// Show version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `run` command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Interval at which the simulated server changes its values
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub tick: Duration,

    /// Stop after this long instead of waiting for a signal
    #[arg(long, value_parser = humantime::parse_duration)]
    pub run_for: Option<Duration>,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `read` command.
#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Node to read (e.g. "ns=2;s=Temperature", "i=2258")
    pub node_id: String,

    /// Attributes to read; repeat for several
    #[arg(short, long = "attribute", default_value = "Value")]
    pub attributes: Vec<String>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `browse` command.
#[derive(Args, Debug, Clone)]
pub struct BrowseArgs {
    /// Node to browse (defaults to the Objects folder)
    #[arg(default_value = "i=85")]
    pub node_id: String,

    /// Reference direction
    #[arg(short, long, default_value = "forward")]
    pub direction: DirectionArg,

    /// Only follow this reference type (e.g. "i=47")
    #[arg(short, long)]
    pub reference_type: Option<String>,

    /// Also follow subtypes of the reference type
    #[arg(long)]
    pub include_subtypes: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

/// Browse direction argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DirectionArg {
    /// Forward references
    #[default]
    Forward,
    /// Inverse references
    Inverse,
    /// Both directions
    Both,
}

impl From<DirectionArg> for BrowseDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Forward => BrowseDirection::Forward,
            DirectionArg::Inverse => BrowseDirection::Inverse,
            DirectionArg::Both => BrowseDirection::Both,
        }
    }
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Run` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Resolves the log level: quiet/verbose flags, then `--log-level`, then
    /// the config file value.
    pub fn effective_log_level(&self, configured: LogLevel) -> LogLevel {
        if self.quiet {
            LogLevel::Warn
        } else if self.verbose {
            LogLevel::Debug
        } else {
            self.log_level.unwrap_or(configured)
        }
    }

    /// Resolves the log format, preferring `--log-format`.
    pub fn effective_log_format(&self, configured: LogFormat) -> LogFormat {
        self.log_format.unwrap_or(configured)
    }
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            run_for: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["uaql"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run(_)));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["uaql", "run", "--tick", "250ms", "--run-for", "2s"]);
        if let Some(Commands::Run(args)) = cli.command {
            assert_eq!(args.tick, Duration::from_millis(250));
            assert_eq!(args.run_for, Some(Duration::from_secs(2)));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["uaql", "validate", "--show-config", "-f", "json"]);
        if let Some(Commands::Validate(args)) = cli.command {
            assert!(args.show_config);
            assert_eq!(args.format, OutputFormat::Json);
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn test_read_command() {
        let cli = Cli::parse_from([
            "uaql",
            "read",
            "ns=2;s=Temperature",
            "-a",
            "Value",
            "-a",
            "DisplayName",
        ]);
        if let Some(Commands::Read(args)) = cli.command {
            assert_eq!(args.node_id, "ns=2;s=Temperature");
            assert_eq!(args.attributes, vec!["Value", "DisplayName"]);
        } else {
            panic!("Expected Read command");
        }
    }

    #[test]
    fn test_browse_defaults_to_objects() {
        let cli = Cli::parse_from(["uaql", "browse"]);
        if let Some(Commands::Browse(args)) = cli.command {
            assert_eq!(args.node_id, "i=85");
            assert_eq!(BrowseDirection::from(args.direction), BrowseDirection::Forward);
        } else {
            panic!("Expected Browse command");
        }
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["uaql", "-c", "/etc/uaql/config.yaml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/uaql/config.yaml"));
    }

    #[test]
    fn test_log_overrides() {
        let cli = Cli::parse_from(["uaql", "-l", "debug", "--log-format", "json"]);
        assert_eq!(cli.effective_log_level(LogLevel::Info), LogLevel::Debug);
        assert_eq!(cli.effective_log_format(LogFormat::Text), LogFormat::Json);

        let cli = Cli::parse_from(["uaql", "-q", "-l", "trace"]);
        assert_eq!(cli.effective_log_level(LogLevel::Info), LogLevel::Warn);
    }
}
