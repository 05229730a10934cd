// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.

mod browse;
mod read;
mod run;
mod validate;
mod version;

pub use browse::browse;
pub use read::read;
pub use run::run;
pub use validate::validate;
pub use version::version;

use std::sync::Arc;

use tracing::warn;
use uaql_config::{load_config, LoggingConfig, UaqlConfig};
use uaql_opcua::{AttributeReader, OpcUaConfig, SessionSupervisor, SimulatedClient};

use crate::cli::{Cli, Commands};
use crate::error::{BinError, BinResult};
use crate::logging::init_logging;

/// Endpoint used by one-shot commands when no config file exists.
pub const DEFAULT_ENDPOINT: &str = "opc.tcp://localhost:4840";

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.effective_command() {
        Commands::Run(args) => {
            let config = load_config(&cli.config).map_err(|e| {
                BinError::from(e).with_context(format!("Loading {}", cli.config.display()))
            })?;
            init_cli_logging(&cli, &config.logging)?;
            run::run(config, args).await
        }
        Commands::Validate(args) => validate::validate(&cli, args),
        Commands::Read(args) => {
            let config = load_or_default(&cli)?;
            init_cli_logging(&cli, &config.logging)?;
            read::read(config, args).await
        }
        Commands::Browse(args) => {
            let config = load_or_default(&cli)?;
            init_cli_logging(&cli, &config.logging)?;
            browse::browse(config, args).await
        }
        Commands::Version => version::version(&cli),
    }
}

fn init_cli_logging(cli: &Cli, logging: &LoggingConfig) -> BinResult<()> {
    init_logging(
        cli.effective_log_level(logging.level),
        cli.effective_log_format(logging.format),
    )
}

/// Loads the config file, or falls back to a default endpoint when there is none.
fn load_or_default(cli: &Cli) -> BinResult<UaqlConfig> {
    if cli.config.exists() {
        return load_config(&cli.config).map_err(|e| {
            BinError::from(e).with_context(format!("Loading {}", cli.config.display()))
        });
    }

    warn!(
        path = %cli.config.display(),
        endpoint = DEFAULT_ENDPOINT,
        "Config file not found, using defaults"
    );
    Ok(UaqlConfig {
        opcua: OpcUaConfig::new(DEFAULT_ENDPOINT),
        ..Default::default()
    })
}

/// A started supervisor with a reader for one-shot commands.
pub(crate) struct OneShot {
    pub(crate) supervisor: Arc<SessionSupervisor<SimulatedClient>>,
    pub(crate) reader: AttributeReader<SimulatedClient>,
}

impl OneShot {
    pub(crate) fn start(config: &UaqlConfig) -> BinResult<Self> {
        let client = Arc::new(SimulatedClient::with_demo_address_space());
        let supervisor = Arc::new(SessionSupervisor::new(client, config.opcua.clone()));
        supervisor.start()?;
        let reader = AttributeReader::new(Arc::clone(&supervisor));
        Ok(Self { supervisor, reader })
    }

    pub(crate) async fn finish(self) {
        self.supervisor.shutdown().await;
    }
}
