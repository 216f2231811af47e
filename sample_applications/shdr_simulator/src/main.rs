// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A toy SHDR adapter: listens for an agent connection, answers its PING
//! with a PONG, and feeds a slow sine wave of axis positions with the
//! occasional execution-state change.

use std::f64::consts::TAU;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const HEARTBEAT_MS: u64 = 10_000;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let port = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(7878u16);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("simulator listening on port {port}");

    loop {
        let (stream, addr) = listener.accept().await?;
        log::info!("agent connected from {addr}");
        if let Err(e) = feed(stream).await {
            log::info!("agent connection ended: {e}");
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

async fn feed(stream: TcpStream) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let mut tick = tokio::time::interval(Duration::from_millis(500));
    let mut step = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.starts_with("* PING") => {
                        write
                            .write_all(format!("* PONG {HEARTBEAT_MS}\n").as_bytes())
                            .await?;
                    }
                    Some(line) => log::debug!("agent sent: {line}"),
                    None => return Ok(()),
                }
            }
            _ = tick.tick() => {
                let position = 25.0 * ((step as f64 / 60.0) * TAU).sin();
                let mut frame = format!("{}|Xact|{position:.4}", timestamp());
                if step % 40 == 0 {
                    let execution = if step % 80 == 0 { "ACTIVE" } else { "READY" };
                    frame.push_str(&format!("|execution|{execution}"));
                }
                frame.push('\n');
                write.write_all(frame.as_bytes()).await?;
                step += 1;
            }
        }
    }
}
