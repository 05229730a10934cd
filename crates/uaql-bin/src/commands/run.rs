// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use tracing::info;
use uaql_config::UaqlConfig;

use crate::cli::RunArgs;
use crate::error::BinResult;
use crate::runtime::RuntimeBuilder;

/// Executes the `run` command.
pub async fn run(config: UaqlConfig, args: RunArgs) -> BinResult<()> {
    let runtime = RuntimeBuilder::new()
        .config(config)
        .tick(args.tick)
        .run_for(args.run_for)
        .build()?;

    let summary = runtime.run().await?;
    info!(
        values = summary.values_received,
        poll_failures = summary.poll_failures,
        sessions = summary.session.sessions_created,
        published = summary.bus.messages_published,
        "Run finished"
    );
    Ok(())
}
