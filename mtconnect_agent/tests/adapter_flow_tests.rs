// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end tests of the adapter path: a fake SHDR adapter on a local
//! socket feeding a live agent.

mod common;

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use common::mill_agent;
use mtconnect_agent::agent::Agent;
use mtconnect_shdr::adapter::AdapterOptionsBuilder;
use mtconnect_shdr::connector::ConnectorOptionsBuilder;

async fn start_adapter(
    agent: &std::sync::Arc<Agent>,
    filter_duplicates: bool,
    auto_available: bool,
) -> TcpListener {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let connector_options = ConnectorOptionsBuilder::default()
        .host("127.0.0.1")
        .port(port)
        .legacy_timeout(Duration::from_secs(10))
        .reconnect_interval(Duration::from_millis(100))
        .build()
        .expect("connector options");
    let adapter_options = AdapterOptionsBuilder::default()
        .device("mill-1")
        .filter_duplicates(filter_duplicates)
        .auto_available(auto_available)
        .build()
        .expect("adapter options");
    agent.start_adapter(connector_options, adapter_options, true);
    listener
}

/// Accept the agent's connection and answer its PING.
async fn accept_with_pong(listener: &TcpListener) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let (stream, _) = listener.accept().await.expect("accept");
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();
    reader.read_line(&mut line).await.expect("ping read");
    assert_eq!(line.trim_end(), "* PING");
    write.write_all(b"* PONG 10000\n").await.expect("pong");
    (reader, write)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn data_lines_land_in_the_buffer() {
    let agent = mill_agent();
    let listener = start_adapter(&agent, false, false).await;
    let (_reader, mut write) = accept_with_pong(&listener).await;

    write
        .write_all(b"2024-01-01T00:00:00.000000Z|Xact|12.5|execution|active\n")
        .await
        .expect("data written");
    settle().await;

    let position = agent.buffer().latest_for("x_pos").expect("position");
    assert_eq!(position.value_string(), "12.5");
    assert_eq!(position.timestamp(), "2024-01-01T00:00:00.000000Z");

    // Event values are upcased by default.
    let execution = agent.buffer().latest_for("exec").expect("execution");
    assert_eq!(execution.value_string(), "ACTIVE");
}

#[tokio::test]
async fn duplicate_values_are_suppressed_once_enabled() {
    let agent = mill_agent();
    let listener = start_adapter(&agent, true, false).await;
    let (_reader, mut write) = accept_with_pong(&listener).await;

    let before = agent.buffer().next_sequence();
    write
        .write_all(b"T1|execution|ACTIVE\nT2|execution|ACTIVE\nT3|execution|READY\n")
        .await
        .expect("data written");
    settle().await;

    // Three lines, one duplicate: the sequence advances by two.
    assert_eq!(agent.buffer().next_sequence(), before + 2);
    assert_eq!(
        agent.buffer().latest_for("exec").unwrap().value_string(),
        "READY"
    );
}

#[tokio::test]
async fn reset_trigger_values_convert_after_the_suffix_is_stripped() {
    let agent = mill_agent();
    let listener = start_adapter(&agent, false, false).await;
    let (_reader, mut write) = accept_with_pong(&listener).await;

    // Xwear reports in inches with a reset trigger; the stored value is the
    // converted reading with the trigger recorded.
    write.write_all(b"T|Xwear|2:MANUAL\n").await.expect("data");
    settle().await;

    let wear = agent.buffer().latest_for("x_wear").expect("wear");
    assert_eq!(wear.value_string(), "50.8");
    assert_eq!(wear.reset_triggered(), Some("MANUAL"));
}

#[tokio::test]
async fn conditions_chain_through_the_adapter() {
    let agent = mill_agent();
    let listener = start_adapter(&agent, false, false).await;
    let (_reader, mut write) = accept_with_pong(&listener).await;

    write
        .write_all(b"T|Xtemp|fault|100|1||Over\nT|Xtemp|warning|200|2||Soft\n")
        .await
        .expect("conditions written");
    settle().await;

    let head = agent.buffer().latest_for("x_temp").expect("condition");
    assert_eq!(head.native_code(), "200");
    assert_eq!(head.previous().expect("chained").native_code(), "100");

    write.write_all(b"T|Xtemp|normal|100||\n").await.expect("clear");
    settle().await;
    let head = agent.buffer().latest_for("x_temp").expect("condition");
    assert_eq!(head.native_code(), "200");
    assert!(head.previous().is_none());
}

#[tokio::test]
async fn availability_follows_the_connection() {
    let agent = mill_agent();
    let listener = start_adapter(&agent, false, true).await;
    let (_reader, mut write) = accept_with_pong(&listener).await;
    settle().await;

    assert_eq!(
        agent.buffer().latest_for("avail").unwrap().value_string(),
        "AVAILABLE"
    );

    // Feed a value so the position belongs to this adapter, then drop the
    // connection: owned items fan out to UNAVAILABLE.
    write.write_all(b"T|Xact|3.25\n").await.expect("data");
    settle().await;
    // Close the listener too so the reconnect attempt cannot succeed and
    // flip availability back.
    drop(listener);
    drop(write);
    drop(_reader);
    settle().await;

    assert!(agent.buffer().latest_for("avail").unwrap().is_unavailable());
    assert!(agent.buffer().latest_for("x_pos").unwrap().is_unavailable());
}

#[tokio::test]
async fn assets_arrive_multiline() {
    let agent = mill_agent();
    let listener = start_adapter(&agent, false, false).await;
    let (_reader, mut write) = accept_with_pong(&listener).await;

    write
        .write_all(
            b"T|@ASSET@|T99|CuttingTool|--multiline--0001\n<CuttingTool serialNumber=\"99\">\n<Location type=\"POT\">7</Location>\n</CuttingTool>\n--multiline--0001\n",
        )
        .await
        .expect("asset written");
    settle().await;

    let asset = agent.assets().get("T99").expect("asset stored");
    assert!(asset.body().contains("serialNumber=\"99\""));
    assert_eq!(asset.keys().get("Location").map(String::as_str), Some("7"));

    let changed = agent.buffer().latest_for("d1_asset_chg").expect("event");
    assert_eq!(changed.value_string(), "T99");
}

#[tokio::test]
async fn probe_command_answers_on_the_socket() {
    let agent = mill_agent();
    let listener = start_adapter(&agent, false, false).await;
    let (mut reader, mut write) = accept_with_pong(&listener).await;

    write.write_all(b"* PROBE\n").await.expect("probe request");

    let mut line = String::new();
    loop {
        line.clear();
        reader.read_line(&mut line).await.expect("response line");
        if line.starts_with("* PROBE LENGTH=") {
            break;
        }
        // Skip any interleaved PINGs.
        assert!(line.trim_end().is_empty() || line.starts_with("* PING"));
    }
    let mut document = String::new();
    reader.read_line(&mut document).await.expect("document");
    assert!(document.contains("<MTConnectDevices>"));
    assert!(document.contains("mill-1"));
}

#[tokio::test]
async fn device_metadata_commands_apply() {
    let agent = mill_agent();
    let listener = start_adapter(&agent, false, false).await;
    let (_reader, mut write) = accept_with_pong(&listener).await;

    write
        .write_all(b"* manufacturer: Acme\n* serialNumber: S-42\n* uuid: NEW-UUID\n")
        .await
        .expect("commands written");
    settle().await;

    let device = agent.model().device("mill-1").expect("device");
    let info = device.info();
    assert_eq!(info.manufacturer.as_deref(), Some("Acme"));
    assert_eq!(info.serial_number.as_deref(), Some("S-42"));
    // PreserveUUID was set when the adapter started.
    assert_eq!(device.uuid(), "M1-UUID");
}
