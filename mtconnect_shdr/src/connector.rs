// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-adapter TCP client loop.
//!
//! On connect the agent sends `* PING`. A peer that answers `* PONG <freq>`
//! switches the connection into heartbeat mode: the agent pings every `freq`
//! milliseconds and expects a PONG within `2 * freq`. A peer that never
//! answers is covered by the legacy idle timeout instead. Either way a dead
//! connection is torn down, the handler is told, and the loop reconnects
//! after the configured interval until cancelled.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::frame::AdapterCommand;

/// Upper bound a `* PONG <freq>` may request for the heartbeat period.
pub const MAX_HEARTBEAT: Duration = Duration::from_secs(30 * 60);

/// Longest accepted SHDR line; multi-line assets arrive as separate lines.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A handler's verdict on a protocol command it cannot survive.
#[derive(Debug, Error)]
#[error("adapter configuration error: {0}")]
pub struct FatalCommandError(pub String);

/// Errors that end the connector task for good. Socket and timeout failures
/// are not here: those disconnect and reconnect.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The handler rejected a protocol command as unrecoverable.
    #[error(transparent)]
    Fatal(#[from] FatalCommandError),
}

/// Receives the parsed traffic of one adapter connection.
///
/// Implementations are synchronous; the connector interleaves them with its
/// socket work on the adapter task.
pub trait FrameHandler: Send {
    /// The connection is up and the initial PING has been written.
    fn connected(&mut self);

    /// The connection went down (any reason). Called exactly once per
    /// established connection.
    fn disconnected(&mut self);

    /// A data line (no leading `*`).
    fn line(&mut self, line: &str);

    /// A protocol command other than PING/PONG. An `Ok(Some(response))` is
    /// written verbatim to the peer (a trailing newline is appended).
    ///
    /// # Errors
    /// A [`FatalCommandError`] stops the adapter permanently.
    fn command(&mut self, command: AdapterCommand)
    -> Result<Option<String>, FatalCommandError>;
}

/// Connection options for one adapter.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(into))]
pub struct ConnectorOptions {
    /// Adapter host name or address.
    pub host: String,
    /// Adapter TCP port.
    pub port: u16,
    /// Idle timeout when the peer does not speak the heartbeat protocol.
    #[builder(default = "Duration::from_secs(600)")]
    pub legacy_timeout: Duration,
    /// Delay between a disconnect and the next connection attempt.
    #[builder(default = "Duration::from_secs(10)")]
    pub reconnect_interval: Duration,
}

/// Sends protocol commands to the adapter over the live connection.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<String>,
}

impl CommandSender {
    /// Queue `command` to be written as `* command` on the socket. Commands
    /// queued while disconnected are dropped when the connection turns over.
    pub fn send(&self, command: impl Into<String>) {
        let _ = self.tx.send(command.into());
    }
}

/// The connect/read/reconnect state machine for one adapter.
pub struct Connector {
    options: ConnectorOptions,
    cancel: CancellationToken,
    command_rx: mpsc::UnboundedReceiver<String>,
}

enum SessionEnd {
    /// Socket closed, timed out, or failed; reconnect.
    Disconnected,
    /// Cancellation was requested.
    Cancelled,
}

impl Connector {
    /// Create a connector and its command-sending handle.
    #[must_use]
    pub fn new(options: ConnectorOptions, cancel: CancellationToken) -> (Self, CommandSender) {
        let (tx, command_rx) = mpsc::unbounded_channel();
        (
            Self {
                options,
                cancel,
                command_rx,
            },
            CommandSender { tx },
        )
    }

    /// Run until cancelled or until the handler reports a fatal
    /// configuration error.
    ///
    /// # Errors
    /// Returns a [`ConnectorError`] when the adapter must stop permanently.
    pub async fn run<H: FrameHandler>(mut self, handler: &mut H) -> Result<(), ConnectorError> {
        let target = format!("{}:{}", self.options.host, self.options.port);
        loop {
            match TcpStream::connect(&target).await {
                Ok(stream) => match self.session(stream, handler).await {
                    Ok(SessionEnd::Cancelled) => return Ok(()),
                    Ok(SessionEnd::Disconnected) => {}
                    Err(fatal) => return Err(fatal),
                },
                Err(e) => {
                    log::warn!("cannot connect to adapter {target}: {e}");
                }
            }

            if self.cancel.is_cancelled() {
                return Ok(());
            }
            log::info!(
                "will try to reconnect to {target} in {:?}",
                self.options.reconnect_interval
            );
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.options.reconnect_interval) => {}
            }
        }
    }

    /// Drive one established connection to its end.
    async fn session<H: FrameHandler>(
        &mut self,
        stream: TcpStream,
        handler: &mut H,
    ) -> Result<SessionEnd, ConnectorError> {
        let peer = stream.peer_addr().map_or_else(
            |_| format!("{}:{}", self.options.host, self.options.port),
            |addr| addr.to_string(),
        );
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let (mut sink, mut lines) = framed.split::<String>();

        // Probe for heartbeat support.
        log::debug!("({peer}) sending initial PING");
        if let Err(e) = sink.send("* PING".to_string()).await {
            log::warn!("({peer}) could not write initial heartbeat: {e}");
            return Ok(SessionEnd::Disconnected);
        }
        handler.connected();

        // Drop any commands queued while disconnected.
        while self.command_rx.try_recv().is_ok() {}

        let mut heartbeats = false;
        let mut heartbeat_period = Duration::from_secs(60);
        let mut last_sent = Instant::now();
        let mut last_pong = Instant::now();

        let end = loop {
            let read_timeout = if heartbeats {
                heartbeat_period
                    .saturating_sub(last_sent.elapsed())
                    .max(Duration::from_millis(1))
            } else {
                self.options.legacy_timeout
            };

            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break SessionEnd::Cancelled,
                Some(command) = self.command_rx.recv() => {
                    if let Err(e) = sink.send(format!("* {command}")).await {
                        log::warn!("({peer}) could not write command '{command}': {e}");
                        break SessionEnd::Disconnected;
                    }
                    continue;
                }
                event = tokio::time::timeout(read_timeout, lines.next()) => event,
            };

            match event {
                Err(_elapsed) if !heartbeats => {
                    log::error!(
                        "({peer}) no data received for {:?}, disconnecting",
                        self.options.legacy_timeout
                    );
                    break SessionEnd::Disconnected;
                }
                Err(_elapsed) => {
                    if last_pong.elapsed() > heartbeat_period * 2 {
                        log::error!(
                            "({peer}) no heartbeat for over {:?}, disconnecting",
                            heartbeat_period * 2
                        );
                        break SessionEnd::Disconnected;
                    }
                    if last_sent.elapsed() >= heartbeat_period {
                        log::debug!("({peer}) sending PING");
                        if let Err(e) = sink.send("* PING".to_string()).await {
                            log::error!("({peer}) could not write heartbeat: {e}");
                            break SessionEnd::Disconnected;
                        }
                        last_sent = Instant::now();
                    }
                }
                Ok(None) => {
                    log::info!("({peer}) connection closed by adapter");
                    break SessionEnd::Disconnected;
                }
                Ok(Some(Err(e))) => {
                    log::error!("({peer}) socket error, disconnecting: {e}");
                    break SessionEnd::Disconnected;
                }
                Ok(Some(Ok(line))) => {
                    if line.is_empty() {
                        continue;
                    }
                    log::trace!("({peer}) received line: '{line}'");
                    if line.starts_with('*') {
                        match AdapterCommand::parse(&line) {
                            AdapterCommand::Pong(freq) => {
                                if heartbeats {
                                    log::debug!("({peer}) received PONG");
                                } else {
                                    match validated_heartbeat(freq) {
                                        Some(period) => {
                                            log::debug!(
                                                "({peer}) starting heartbeats every {period:?}"
                                            );
                                            heartbeats = true;
                                            heartbeat_period = period;
                                        }
                                        None => {
                                            log::error!(
                                                "({peer}) bad heartbeat command '{line}', ignoring"
                                            );
                                        }
                                    }
                                }
                                last_pong = Instant::now();
                            }
                            command => match handler.command(command) {
                                Ok(Some(response)) => {
                                    if let Err(e) = sink.send(response).await {
                                        log::warn!(
                                            "({peer}) could not write command response: {e}"
                                        );
                                        break SessionEnd::Disconnected;
                                    }
                                }
                                Ok(None) => {}
                                Err(fatal) => {
                                    log::error!("({peer}) {fatal}, stopping adapter");
                                    handler.disconnected();
                                    return Err(fatal.into());
                                }
                            },
                        }
                    } else {
                        handler.line(&line);
                    }

                    // Keep pinging even when the peer floods us with data.
                    if heartbeats && last_sent.elapsed() >= heartbeat_period {
                        log::debug!("({peer}) sending PING");
                        if let Err(e) = sink.send("* PING".to_string()).await {
                            log::error!("({peer}) could not write heartbeat: {e}");
                            break SessionEnd::Disconnected;
                        }
                        last_sent = Instant::now();
                    }
                }
            }
        };

        handler.disconnected();
        Ok(end)
    }
}

/// Validate a PONG frequency: positive and under [`MAX_HEARTBEAT`].
fn validated_heartbeat(freq_ms: Option<u64>) -> Option<Duration> {
    let freq_ms = freq_ms?;
    if freq_ms == 0 {
        return None;
    }
    let period = Duration::from_millis(freq_ms);
    (period < MAX_HEARTBEAT).then_some(period)
}
