// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `read` command.

use uaql_config::UaqlConfig;
use uaql_opcua::{AttributeId, DataValue, NodeId};

use crate::cli::{OutputFormat, ReadArgs};
use crate::commands::OneShot;
use crate::error::{BinError, BinResult};

/// Reads the requested attributes of one node in a single request.
pub async fn read(config: UaqlConfig, args: ReadArgs) -> BinResult<()> {
    let node_id: NodeId = args
        .node_id
        .parse()
        .map_err(|e| BinError::invalid_argument(format!("{}: {}", args.node_id, e)))?;
    let attributes = parse_attributes(&args.attributes)?;

    let session = OneShot::start(&config)?;
    let result = session.reader.read_attributes(&node_id, &attributes).await;
    session.finish().await;

    println!("{}", render(&node_id, &attributes, &result?, args.format)?);
    Ok(())
}

pub(crate) fn parse_attributes(raw: &[String]) -> BinResult<Vec<AttributeId>> {
    raw.iter()
        .map(|name| {
            name.parse()
                .map_err(|e| BinError::invalid_argument(format!("{}: {}", name, e)))
        })
        .collect()
}

pub(crate) fn render(
    node_id: &NodeId,
    attributes: &[AttributeId],
    values: &[DataValue],
    format: OutputFormat,
) -> BinResult<String> {
    match format {
        OutputFormat::Text => {
            let mut out = format!("{}\n", node_id);
            for (attribute, value) in attributes.iter().zip(values) {
                out.push_str(&format!(
                    "  {:<24} {} [{}]\n",
                    attribute.name(),
                    value.value,
                    value.status
                ));
            }
            Ok(out.trim_end().to_string())
        }
        OutputFormat::Json => {
            let rows: Vec<_> = attributes
                .iter()
                .zip(values)
                .map(|(attribute, value)| {
                    serde_json::json!({
                        "attribute": attribute.name(),
                        "value": value,
                    })
                })
                .collect();
            let output = serde_json::json!({
                "node_id": node_id.to_string(),
                "results": rows,
            });
            serde_json::to_string_pretty(&output).map_err(|e| BinError::runtime(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uaql_opcua::StatusCode;

    #[test]
    fn test_parse_attributes() {
        let parsed = parse_attributes(&["Value".to_string(), "display_name".to_string()]).unwrap();
        assert_eq!(parsed, vec![AttributeId::Value, AttributeId::DisplayName]);

        let err = parse_attributes(&["Colour".to_string()]).unwrap_err();
        assert_eq!(err.exit_code(), 64);
    }

    #[test]
    fn test_render_text() {
        let node = NodeId::string(2, "Temperature");
        let rendered = render(
            &node,
            &[AttributeId::Value, AttributeId::Description],
            &[
                DataValue::good(21.5),
                DataValue::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
            ],
            OutputFormat::Text,
        )
        .unwrap();

        assert!(rendered.starts_with("ns=2;s=Temperature"));
        assert!(rendered.contains("Value"));
        assert!(rendered.contains("21.5"));
        assert!(rendered.contains("BadAttributeIdInvalid"));
    }

    #[test]
    fn test_render_json() {
        let node = NodeId::numeric(0, 2258);
        let rendered = render(
            &node,
            &[AttributeId::Value],
            &[DataValue::good(7u32)],
            OutputFormat::Json,
        )
        .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["node_id"], "i=2258");
        assert_eq!(parsed["results"][0]["attribute"], "Value");
        assert_eq!(parsed["results"][0]["value"]["value"], 7);
    }
}
