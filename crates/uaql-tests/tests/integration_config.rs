// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Loading configuration files and running a client stack from them.

use std::env;
use std::fs;
use std::time::Duration;

use uaql_config::{ConfigError, ConfigFormat, ConfigLoader, LogLevel};
use uaql_opcua::{SimulatedClient, Variant};
use uaql_tests::prelude::*;

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_load_yaml_file() {
    let dir = temp_test_dir("uaql-config");
    let path = dir.path().join("uaql.yaml");
    fs::write(&path, ConfigFixtures::yaml(SIM_ENDPOINT)).unwrap();

    let config = ConfigLoader::new()
        .with_env_prefix("UAQL_IT_YAML")
        .load(&path)
        .unwrap();

    assert_eq!(config.opcua.endpoint, SIM_ENDPOINT);
    assert_eq!(config.opcua.request_timeout, Duration::from_millis(300));
    assert_eq!(config.opcua.reconnect.initial_delay, Duration::from_millis(5));
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.watch.len(), 3);
    assert_eq!(config.subscribed_points().count(), 2);
    assert_eq!(config.polled_points().count(), 1);
    assert_eq!(config.watch[0].display_name(), "temperature");
    assert_eq!(config.watch[1].display_name(), "ns=2;s=Pressure");
}

#[test]
fn test_load_toml_file() {
    let dir = temp_test_dir("uaql-config");
    let path = dir.path().join("uaql.toml");
    fs::write(
        &path,
        r#"
[opcua]
endpoint = "opc.tcp://sim:4840"
request_timeout = "2s"

[[watch]]
node_id = "ns=2;s=Counter"
poll_interval = "250ms"

[bus]
capacity = 64
"#,
    )
    .unwrap();

    let config = ConfigLoader::new()
        .with_env_prefix("UAQL_IT_TOML")
        .load(&path)
        .unwrap();

    assert_eq!(config.opcua.request_timeout, Duration::from_secs(2));
    assert_eq!(config.watch[0].node_id, Nodes::counter());
    assert_eq!(config.watch[0].poll_interval, Some(Duration::from_millis(250)));
    assert_eq!(config.bus.capacity, 64);
}

#[test]
fn test_placeholders_and_overrides() {
    env::set_var("UAQL_IT_ENV_HOST", "plc-7");
    env::set_var("UAQL_IT_ENV_LOG_LEVEL", "warn");

    let content = r#"
opcua:
  endpoint: "opc.tcp://${UAQL_IT_ENV_HOST}:${UAQL_IT_ENV_PORT:4840}"
watch:
  - node_id: "ns=2;s=Temperature"
"#;
    let config = ConfigLoader::new()
        .with_env_prefix("UAQL_IT_ENV")
        .load_from_str(content, ConfigFormat::Yaml)
        .unwrap();

    assert_eq!(config.opcua.endpoint, "opc.tcp://plc-7:4840");
    assert_eq!(config.logging.level, LogLevel::Warn);
}

#[test]
fn test_duplicate_watch_points_rejected() {
    let content = r#"
opcua:
  endpoint: "opc.tcp://sim:4840"
watch:
  - node_id: "ns=2;s=Temperature"
  - node_id: "ns=2;s=Temperature"
    attribute: value
"#;
    let error = ConfigLoader::new()
        .with_env_prefix("UAQL_IT_DUP")
        .load_from_str(content, ConfigFormat::Yaml)
        .unwrap_err();
    assert!(matches!(
        error,
        ConfigError::DuplicateWatchPoint { first: 0, duplicate: 1, .. }
    ));
    assert!(error.to_string().contains("Temperature"));
}

#[test]
fn test_missing_file() {
    let dir = temp_test_dir("uaql-config");
    let error = ConfigLoader::new()
        .load(dir.path().join("absent.yaml"))
        .unwrap_err();
    assert!(error.is_file_error());
}

// =============================================================================
// Running From Config
// =============================================================================

#[tokio::test]
async fn test_watch_points_from_config() {
    init_test_logging();
    let config = ConfigLoader::new()
        .with_env_prefix("UAQL_IT_RUN")
        .load_from_str(&ConfigFixtures::yaml(SIM_ENDPOINT), ConfigFormat::Yaml)
        .unwrap();

    let harness =
        SimHarness::new(SimulatedClient::with_demo_address_space(), config.opcua.clone()).started();

    let mut streams = Vec::new();
    for point in config.subscribed_points() {
        let stream = harness
            .multiplexer
            .subscribe(point.node_id.clone(), point.attribute)
            .await
            .unwrap();
        assert_eq!(stream.key(), &point.key());
        streams.push(stream);
    }
    assert_eq!(harness.multiplexer.key_count(), 2);

    // Initial values arrive on every subscribed point.
    for stream in &mut streams {
        let first = within(HARNESS_TIMEOUT, stream.recv()).await.unwrap();
        assert!(first.value.status.is_good());
    }

    let polled = config.polled_points().next().unwrap();
    let interval = polled.poll_interval.unwrap();
    let mut polling = harness.reader.poll(polled.node_id.clone(), polled.attribute, interval);

    harness.client.advance();
    within(HARNESS_TIMEOUT, async {
        loop {
            let notification = polling.recv().await.unwrap().unwrap();
            if notification.value.value == Variant::UInt32(1) {
                break;
            }
        }
    })
    .await;

    drop(polling);
    harness.shutdown().await;
}
