// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The long-poll multipart streamer.
//!
//! The streaming variants of current and sample write
//! `multipart/x-mixed-replace` parts over a chunked response. Each iteration
//! snapshots under the sequence lock, writes one part, and then either races
//! through buffered backlog (1 ms pacing) or blocks on a change observer
//! until data arrives or a heartbeat is due. Client disconnect surfaces as a
//! failed channel send; dropping the observer unsubscribes it.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use axum::http::{Response, header};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use mtconnect_core::observer::ChangeObserver;

use crate::printer::{DocumentInfo, ErrorCode, Printer};

use super::HttpState;

/// Parameters of one streaming request, already validated.
#[derive(Debug, Clone, Copy)]
pub struct StreamParams {
    /// Current (latest snapshot) versus sample (range scan) mode.
    pub current: bool,
    /// Minimum spacing between parts.
    pub interval: Duration,
    /// Empty-part keepalive period for sample mode.
    pub heartbeat: Duration,
    /// First sequence of interest (sample mode).
    pub start: u64,
    /// Maximum observations per part (sample mode).
    pub count: usize,
}

/// Build the chunked multipart response and spawn its producer task.
pub fn stream_response(
    state: Arc<HttpState>,
    filter: HashSet<String>,
    printer: Arc<dyn Printer>,
    params: StreamParams,
) -> Response<Body> {
    let boundary = uuid::Uuid::new_v4().simple().to_string();
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(4);

    tokio::spawn(stream_task(
        state,
        filter,
        printer,
        params,
        boundary.clone(),
        tx,
    ));

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace;boundary={boundary}"),
        )
        .header(header::EXPIRES, "-1")
        .header(header::CACHE_CONTROL, "private, max-age=0")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .expect("static response headers are valid")
}

/// One multipart part: boundary, part headers, and the document terminated
/// with CRLF.
fn part(boundary: &str, mime_type: &str, content: &str) -> Bytes {
    let mut content = content.to_string();
    content.push_str("\r\n");
    Bytes::from(format!(
        "--{boundary}\r\nContent-type: {mime_type}\r\nContent-length: {}\r\n\r\n{content}",
        content.len()
    ))
}

async fn stream_task(
    state: Arc<HttpState>,
    filter: HashSet<String>,
    printer: Arc<dyn Printer>,
    params: StreamParams,
    boundary: String,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
) {
    let agent = &state.agent;
    let buffer = agent.buffer();

    let observer = ChangeObserver::new();
    for id in &filter {
        if let Some(data_item) = agent.model().data_item(id) {
            data_item.add_observer(&observer);
        }
    }

    let mut start = params.start.max(buffer.first_sequence());
    loop {
        let iteration_start = Instant::now();

        let mut at_end = true;
        let content = if params.current {
            let observations = buffer.latest(Some(&filter));
            printer.print_streams(&agent.document_info(), agent.model(), &observations)
        } else {
            // A client that fell behind the retained window cannot resume.
            if start < buffer.first_sequence() {
                log::warn!("streaming client fell too far behind, disconnecting");
                let document = printer.print_error(
                    &agent.document_info(),
                    ErrorCode::OutOfRange,
                    "Client can't keep up with event stream, disconnecting",
                );
                let _ = tx
                    .send(Ok(part(&boundary, printer.mime_type(), &document)))
                    .await;
                break;
            }

            // The observer resets under the sequence lock so nothing arriving
            // between the scan and the reset is missed.
            let result =
                buffer.range_with_reset(&filter, start, params.count, Some(&observer));
            at_end = result.at_end;
            let info = DocumentInfo {
                next_sequence: result.end_sequence,
                first_sequence: result.first_sequence,
                last_sequence: result.next_sequence.saturating_sub(1),
                ..agent.document_info()
            };
            start = result.end_sequence;
            printer.print_streams(&info, agent.model(), &result.observations)
        };

        if tx
            .send(Ok(part(&boundary, printer.mime_type(), &content)))
            .await
            .is_err()
        {
            // Client went away.
            break;
        }

        if !params.current && !at_end {
            // Catching up through backlog: no blocking, minimal pacing.
            tokio::time::sleep(Duration::from_millis(1)).await;
            continue;
        }

        if !params.current {
            // Wait for data or a full heartbeat; spurious wakeups loop for
            // the remaining time.
            loop {
                let elapsed = iteration_start.elapsed();
                if elapsed >= params.heartbeat {
                    break;
                }
                if !observer.wait(params.heartbeat - elapsed).await {
                    break;
                }
                if observer.was_signaled() {
                    break;
                }
            }
            start = buffer.restart_sequence(&observer);
        }

        // Space iterations at least `interval` apart.
        let elapsed = iteration_start.elapsed();
        if elapsed < params.interval {
            tokio::time::sleep(params.interval - elapsed).await;
        }
    }
}
