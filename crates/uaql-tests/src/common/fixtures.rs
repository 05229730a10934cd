// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures

use std::time::Duration;

use uaql_core::BackoffPolicy;
use uaql_opcua::{AttributeId, NodeId, OpcUaConfig, OpcUaError, Operation, StatusCode};

/// Endpoint used by every simulated test.
pub const SIM_ENDPOINT: &str = "opc.tcp://sim:4840";

// =============================================================================
// Configurations
// =============================================================================

/// Client configurations tuned for tests.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Short timeouts and a 5 ms fixed reconnect delay, retrying forever.
    pub fn fast() -> OpcUaConfig {
        OpcUaConfig::builder()
            .endpoint(SIM_ENDPOINT)
            .session_name("uaql-test")
            .request_timeout(Duration::from_millis(300))
            .reconnect(BackoffPolicy::fixed(Duration::from_millis(5)))
            .build()
            .expect("fixture config is valid")
    }

    /// Like [`fast`](Self::fast) but giving up after `retries`.
    pub fn fast_with_retries(retries: u32) -> OpcUaConfig {
        let mut config = Self::fast();
        config.reconnect = config.reconnect.with_max_retries(retries);
        config
    }

    /// A YAML file body with two subscribed points and one polled point.
    pub fn yaml(endpoint: &str) -> String {
        format!(
            r#"
opcua:
  endpoint: "{endpoint}"
  request_timeout: 300ms
  reconnect:
    initial_delay: 5
    max_delay: 50

watch:
  - node_id: "ns=2;s=Temperature"
    label: temperature
  - node_id: "ns=2;s=Pressure"
  - node_id: "ns=2;s=Counter"
    poll_interval: 20ms

logging:
  level: debug
"#
        )
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// Node ids of the simulated demo address space.
pub struct Nodes;

impl Nodes {
    /// Demo device object.
    pub fn device() -> NodeId {
        NodeId::string(2, "Device")
    }

    /// Writable Double variable.
    pub fn temperature() -> NodeId {
        NodeId::string(2, "Temperature")
    }

    /// Writable Double variable.
    pub fn pressure() -> NodeId {
        NodeId::string(2, "Pressure")
    }

    /// Read-only UInt32 variable incremented by `advance`.
    pub fn counter() -> NodeId {
        NodeId::string(2, "Counter")
    }

    /// Node that does not exist.
    pub fn missing() -> NodeId {
        NodeId::string(2, "Missing")
    }
}

/// Attribute used by most tests.
pub const VALUE: AttributeId = AttributeId::Value;

/// An error the supervisor treats as session-fatal.
pub fn session_closed_error(node: &NodeId) -> OpcUaError {
    OpcUaError::request_failed(Operation::Read, node.to_string(), StatusCode::BAD_SESSION_CLOSED)
}
