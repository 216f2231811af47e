// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared setup for the agent integration tests: an in-process agent with
//! the two-axis mill model, an HTTP server on an ephemeral port, and raw
//! socket HTTP helpers.
#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mtconnect_agent::agent::Agent;
use mtconnect_agent::http::files::FileRegistry;
use mtconnect_agent::http::{HttpState, router};
use mtconnect_agent::model_file;

pub const MILL: &str = r#"{
    "version": "1.3",
    "devices": [{
        "id": "d1",
        "name": "mill-1",
        "uuid": "M1-UUID",
        "dataItems": [
            {"id": "avail", "type": "AVAILABILITY", "category": "EVENT"},
            {"id": "exec", "name": "execution", "type": "EXECUTION", "category": "EVENT"}
        ],
        "components": [{
            "id": "axes",
            "type": "Axes",
            "components": [{
                "id": "x",
                "type": "Linear",
                "name": "X",
                "dataItems": [
                    {"id": "x_pos", "name": "Xact", "type": "POSITION", "category": "SAMPLE",
                     "units": "MILLIMETER", "nativeUnits": "MILLIMETER"},
                    {"id": "x_wear", "name": "Xwear", "type": "TOOL_OFFSET", "category": "SAMPLE",
                     "units": "MILLIMETER", "nativeUnits": "INCH", "resetTrigger": "MANUAL"},
                    {"id": "x_temp", "name": "Xtemp", "type": "TEMPERATURE", "category": "CONDITION"}
                ]
            }]
        }]
    }]
}"#;

pub fn mill_agent() -> Arc<Agent> {
    let devices = model_file::parse(MILL).expect("test model parses");
    Agent::new(devices, 8, 16, 8).expect("test model is valid")
}

pub async fn serve(agent: Arc<Agent>, put_enabled: bool) -> SocketAddr {
    let state = Arc::new(HttpState {
        agent,
        put_enabled,
        put_allowed_hosts: HashSet::new(),
        files: FileRegistry::new(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server runs");
    });
    addr
}

/// One-shot request over a raw socket; returns (status, body).
pub async fn request(addr: SocketAddr, method: &str, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .expect("request written");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("response read");
    let text = String::from_utf8_lossy(&raw).to_string();

    let status: u16 = text
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

pub async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    request(addr, "GET", path).await
}

/// Open a streaming request and collect whatever arrives within `window`.
pub async fn read_stream_for(addr: SocketAddr, path: &str, window: Duration) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("request written");

    let deadline = tokio::time::Instant::now() + window;
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => raw.extend_from_slice(&chunk[..n]),
            Ok(Err(_)) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&raw).to_string()
}
