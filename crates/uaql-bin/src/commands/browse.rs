// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `browse` command.

use uaql_config::UaqlConfig;
use uaql_opcua::{BrowseFilter, NodeId, Reference};

use crate::cli::{BrowseArgs, OutputFormat};
use crate::commands::OneShot;
use crate::error::{BinError, BinResult};

/// Lists the references of one node.
pub async fn browse(config: UaqlConfig, args: BrowseArgs) -> BinResult<()> {
    let node_id: NodeId = parse_node(&args.node_id)?;
    let mut filter = BrowseFilter::new()
        .direction(args.direction.into())
        .include_subtypes(args.include_subtypes);
    if let Some(raw) = &args.reference_type {
        filter = filter.reference_type(parse_node(raw)?);
    }

    let session = OneShot::start(&config)?;
    let result = session.reader.browse_references(&node_id, &filter).await;
    session.finish().await;

    println!("{}", render(&node_id, &result?, args.format)?);
    Ok(())
}

fn parse_node(raw: &str) -> BinResult<NodeId> {
    raw.parse()
        .map_err(|e| BinError::invalid_argument(format!("{}: {}", raw, e)))
}

pub(crate) fn render(
    node_id: &NodeId,
    references: &[Reference],
    format: OutputFormat,
) -> BinResult<String> {
    match format {
        OutputFormat::Text => {
            let mut out = format!("{} ({} references)\n", node_id, references.len());
            for reference in references {
                let d = &reference.description;
                out.push_str(&format!(
                    "  {} {:<24} {:<12?} {}\n",
                    if d.is_forward { "->" } else { "<-" },
                    d.display_name,
                    d.node_class,
                    d.node_id
                ));
            }
            Ok(out.trim_end().to_string())
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(references).map_err(|e| BinError::runtime(e.to_string()))
        }
    }
}
