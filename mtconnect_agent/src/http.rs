// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The HTTP protocol surface.
//!
//! Probe, current, sample, and asset endpoints; PUT injection of
//! observations and adapter commands (gated by configuration and an IP
//! allow-list); registered static files; and the streaming variants of
//! current and sample. Validation failures render as MTConnect error
//! documents with HTTP 200 bodies.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, Response, StatusCode, Uri, header};
use axum::response::IntoResponse;
use axum::routing::get;

use mtconnect_core::device_model::path::PathFilter;

use crate::agent::Agent;
use crate::printer::{DocumentInfo, ErrorCode, JsonPrinter, Printer, XmlPrinter};

pub mod files;
pub mod params;
pub mod streamer;

use files::{FileFetch, FileRegistry};
use params::{Min, RequestError, heartbeat_param, int_param, interval_param};
use streamer::StreamParams;

/// Default observation count for sample requests.
const DEFAULT_COUNT: u64 = 100;

/// Shared state of the HTTP service.
pub struct HttpState {
    /// The agent.
    pub agent: Arc<Agent>,
    /// PUT/POST enabled by configuration.
    pub put_enabled: bool,
    /// Source addresses allowed to PUT; empty allows all.
    pub put_allowed_hosts: HashSet<IpAddr>,
    /// Registered static files.
    pub files: FileRegistry,
}

/// Build the router.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/assets", get(get_assets))
        .route(
            "/asset/:ids",
            get(get_asset_by_ids)
                .put(put_asset)
                .post(put_asset),
        )
        .route("/:first", get(get_first).put(put_device).post(put_device))
        .route("/:device/:call", get(get_second))
        .fallback(fallback)
        .with_state(state)
}

/// Printer selection: JSON on request, XML otherwise.
fn printer_for(headers: &HeaderMap, queries: &HashMap<String, String>) -> Arc<dyn Printer> {
    let wants_json = queries.get("format").is_some_and(|format| format == "json")
        || headers
            .get(header::ACCEPT)
            .and_then(|accept| accept.to_str().ok())
            .is_some_and(|accept| accept.contains("application/json"));
    if wants_json {
        Arc::new(JsonPrinter::new())
    } else {
        Arc::new(XmlPrinter::new())
    }
}

fn document(printer: &dyn Printer, body: String) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, printer.mime_type())
        .body(Body::from(body))
        .expect("static response headers are valid")
}

fn error_document(
    state: &HttpState,
    printer: &dyn Printer,
    code: ErrorCode,
    message: &str,
) -> Response<Body> {
    log::debug!("returning error {}: {message}", code.as_str());
    document(
        printer,
        printer.print_error(&state.agent.document_info(), code, message),
    )
}

fn request_error(
    state: &HttpState,
    printer: &dyn Printer,
    error: &RequestError,
) -> Response<Body> {
    error_document(state, printer, error.code, &error.message)
}

/// Prefix the path expression with the device selector, mirroring the
/// original `devicesAndPath`.
fn devices_and_path(path: Option<&str>, device: Option<&str>) -> String {
    match device {
        Some(device) => {
            let prefix = format!("//Devices/Device[@name=\"{device}\"]");
            match path {
                Some(path) if !path.is_empty() => path
                    .split('|')
                    .map(|token| format!("{prefix}{token}"))
                    .collect::<Vec<_>>()
                    .join("|"),
                _ => prefix,
            }
        }
        None => match path {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => "//Devices/Device".to_string(),
        },
    }
}

/// Resolve the `path` query into a data-item filter.
fn resolve_filter(
    state: &HttpState,
    queries: &HashMap<String, String>,
    device: Option<&str>,
) -> Result<HashSet<String>, RequestError> {
    let path = devices_and_path(queries.get("path").map(String::as_str), device);
    let filter = PathFilter::parse(&path)
        .map_err(|e| RequestError::new(ErrorCode::InvalidXpath, e.to_string()))?
        .resolve(state.agent.model());
    if filter.is_empty() {
        return Err(RequestError::new(
            ErrorCode::InvalidXpath,
            format!("The path could not be parsed. Invalid syntax: {path}"),
        ));
    }
    Ok(filter)
}

fn probe(state: &HttpState, printer: &dyn Printer, device: Option<&str>) -> Response<Body> {
    let agent = &state.agent;
    let devices = match device {
        Some(name) => match agent.model().device(name) {
            Some(device) => vec![device.clone()],
            None => {
                return error_document(
                    state,
                    printer,
                    ErrorCode::NoDevice,
                    &format!("Could not find the device '{name}'"),
                );
            }
        },
        None => agent.model().devices().to_vec(),
    };
    document(
        printer,
        printer.print_probe(
            &agent.document_info(),
            &devices,
            &agent.assets().counts_by_type(),
        ),
    )
}

fn current(
    state: &Arc<HttpState>,
    printer: &Arc<dyn Printer>,
    queries: &HashMap<String, String>,
    device: Option<&str>,
) -> Response<Body> {
    let agent = &state.agent;
    let result = (|| {
        let interval = interval_param(queries)?;
        let (first, next) = agent.buffer().sequence_bounds();
        let at = int_param(queries, "at", Min::Error(first), Some(next.saturating_sub(1)))?;
        let heartbeat = heartbeat_param(queries)?;
        if interval.is_some() && at.is_some() {
            return Err(RequestError::new(
                ErrorCode::InvalidRequest,
                "You cannot specify both the at and frequency arguments to a current request",
            ));
        }
        let filter = resolve_filter(state, queries, device)?;
        Ok((interval, at, heartbeat, filter))
    })();

    let (interval, at, heartbeat, filter) = match result {
        Ok(parts) => parts,
        Err(error) => return request_error(state, printer.as_ref(), &error),
    };

    if let Some(interval) = interval {
        return streamer::stream_response(
            state.clone(),
            filter,
            printer.clone(),
            StreamParams {
                current: true,
                interval: Duration::from_millis(interval),
                heartbeat: Duration::from_millis(heartbeat),
                start: 0,
                count: 0,
            },
        );
    }

    let observations = match at {
        Some(at) => agent.buffer().current_at(&filter, at),
        None => agent.buffer().latest(Some(&filter)),
    };
    document(
        printer.as_ref(),
        printer.print_streams(&agent.document_info(), agent.model(), &observations),
    )
}

fn sample(
    state: &Arc<HttpState>,
    printer: &Arc<dyn Printer>,
    queries: &HashMap<String, String>,
    device: Option<&str>,
) -> Response<Body> {
    let agent = &state.agent;
    let result = (|| {
        let (first, next) = agent.buffer().sequence_bounds();
        let count = int_param(
            queries,
            "count",
            Min::Error(1),
            Some(agent.buffer().capacity()),
        )?
        .unwrap_or(DEFAULT_COUNT);
        let interval = interval_param(queries)?;
        let start = match int_param(queries, "start", Min::Error(first), Some(next))? {
            Some(start) => start,
            None => int_param(queries, "from", Min::Error(first), Some(next))?.unwrap_or(1),
        };
        let heartbeat = heartbeat_param(queries)?;
        let filter = resolve_filter(state, queries, device)?;
        Ok((count, interval, start, heartbeat, filter))
    })();

    let (count, interval, start, heartbeat, filter) = match result {
        Ok(parts) => parts,
        Err(error) => return request_error(state, printer.as_ref(), &error),
    };

    if let Some(interval) = interval {
        return streamer::stream_response(
            state.clone(),
            filter,
            printer.clone(),
            StreamParams {
                current: false,
                interval: Duration::from_millis(interval),
                heartbeat: Duration::from_millis(heartbeat),
                start,
                count: usize::try_from(count).unwrap_or(usize::MAX),
            },
        );
    }

    let result = agent.buffer().range(
        &filter,
        start,
        usize::try_from(count).unwrap_or(usize::MAX),
    );
    let info = DocumentInfo {
        next_sequence: result.end_sequence,
        first_sequence: result.first_sequence,
        last_sequence: result.next_sequence.saturating_sub(1),
        ..agent.document_info()
    };
    document(
        printer.as_ref(),
        printer.print_streams(&info, agent.model(), &result.observations),
    )
}

async fn get_root(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(queries): Query<HashMap<String, String>>,
) -> Response<Body> {
    let printer = printer_for(&headers, &queries);
    probe(&state, printer.as_ref(), None)
}

async fn get_first(
    State(state): State<Arc<HttpState>>,
    Path(first): Path<String>,
    headers: HeaderMap,
    Query(queries): Query<HashMap<String, String>>,
) -> Response<Body> {
    let printer = printer_for(&headers, &queries);
    match first.as_str() {
        "probe" => probe(&state, printer.as_ref(), None),
        "current" => current(&state, &printer, &queries, None),
        "sample" => sample(&state, &printer, &queries, None),
        "asset" | "assets" => assets_list(&state, printer.as_ref(), &queries),
        _ if state.agent.model().device(&first).is_some() => {
            probe(&state, printer.as_ref(), Some(&first))
        }
        _ => serve_file_or_invalid(&state, printer.as_ref(), &format!("/{first}")),
    }
}

async fn get_second(
    State(state): State<Arc<HttpState>>,
    Path((device, call)): Path<(String, String)>,
    headers: HeaderMap,
    Query(queries): Query<HashMap<String, String>>,
) -> Response<Body> {
    let printer = printer_for(&headers, &queries);
    match call.as_str() {
        "probe" => probe(&state, printer.as_ref(), Some(&device)),
        "current" => current(&state, &printer, &queries, Some(&device)),
        "sample" => sample(&state, &printer, &queries, Some(&device)),
        _ => serve_file_or_invalid(&state, printer.as_ref(), &format!("/{device}/{call}")),
    }
}

fn assets_list(
    state: &HttpState,
    printer: &dyn Printer,
    queries: &HashMap<String, String>,
) -> Response<Body> {
    let agent = &state.agent;
    let count = match int_param(queries, "count", Min::Clamp(1), None) {
        Ok(count) => count.map_or(agent.assets().count().max(1), |count| {
            usize::try_from(count).unwrap_or(usize::MAX)
        }),
        Err(error) => return request_error(state, printer, &error),
    };
    let type_filter = queries.get("type").map(String::as_str);
    let include_removed = queries.get("removed").is_some_and(|removed| removed == "true");

    let assets = agent.assets().list(type_filter, include_removed, count);
    document(
        printer,
        printer.print_assets(&agent.document_info(), &assets),
    )
}

async fn get_assets(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(queries): Query<HashMap<String, String>>,
) -> Response<Body> {
    let printer = printer_for(&headers, &queries);
    assets_list(&state, printer.as_ref(), &queries)
}

async fn get_asset_by_ids(
    State(state): State<Arc<HttpState>>,
    Path(ids): Path<String>,
    headers: HeaderMap,
    Query(queries): Query<HashMap<String, String>>,
) -> Response<Body> {
    let printer = printer_for(&headers, &queries);
    let agent = &state.agent;

    let mut assets = Vec::new();
    for id in ids.split([',', ';']).filter(|id| !id.is_empty()) {
        match agent.assets().get(id) {
            Some(asset) => assets.push(asset),
            None => {
                return error_document(
                    &state,
                    printer.as_ref(),
                    ErrorCode::AssetNotFound,
                    &format!("Could not find asset: {id}"),
                );
            }
        }
    }
    document(
        printer.as_ref(),
        printer.print_assets(&agent.document_info(), &assets),
    )
}

/// PUT gating shared by the observation and asset paths.
fn check_put_allowed(
    state: &HttpState,
    printer: &dyn Printer,
    addr: IpAddr,
) -> Option<Response<Body>> {
    if !state.put_enabled {
        return Some(error_document(
            state,
            printer,
            ErrorCode::Unsupported,
            "Only the HTTP GET request is supported",
        ));
    }
    if !state.put_allowed_hosts.is_empty() && !state.put_allowed_hosts.contains(&addr) {
        return Some(error_document(
            state,
            printer,
            ErrorCode::Unsupported,
            &format!("HTTP PUT is not allowed from {addr}"),
        ));
    }
    None
}

async fn put_device(
    State(state): State<Arc<HttpState>>,
    Path(device): Path<String>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(queries): Query<HashMap<String, String>>,
) -> Response<Body> {
    let printer = printer_for(&headers, &queries);
    if let Some(rejected) = check_put_allowed(&state, printer.as_ref(), addr.ip()) {
        return rejected;
    }

    let agent = &state.agent;
    let Some(target) = agent.model().device(&device).cloned() else {
        return error_document(
            &state,
            printer.as_ref(),
            ErrorCode::Unsupported,
            &format!("Cannot find device: {device}"),
        );
    };

    if queries.get("_type").map(String::as_str) == Some("command") {
        for (key, value) in &queries {
            agent.send_adapter_command(target.name(), &format!("{key}={value}"));
        }
    } else {
        let time = queries.get("time").cloned().unwrap_or_default();
        for (key, value) in &queries {
            if key == "time" {
                continue;
            }
            match target.data_item(key) {
                // The value goes in as received; reset-trigger stripping and
                // unit conversion happen in observation construction, the
                // same path adapter input takes.
                Some(data_item) => {
                    agent.add_to_buffer(data_item, value, &time);
                }
                None => log::warn!("({device}) could not find data item: {key}"),
            }
        }
    }

    document(printer.as_ref(), "<success/>".to_string())
}

async fn put_asset(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(queries): Query<HashMap<String, String>>,
    body: String,
) -> Response<Body> {
    let printer = printer_for(&headers, &queries);
    if let Some(rejected) = check_put_allowed(&state, printer.as_ref(), addr.ip()) {
        return rejected;
    }

    let agent = &state.agent;
    let device = queries
        .get("device")
        .and_then(|name| agent.model().device(name))
        .unwrap_or_else(|| agent.model().first_device());
    let asset_type = queries.get("type").cloned().unwrap_or_default();

    let stored = mtconnect_shdr::sink::AdapterSink::add_asset(
        agent.as_ref(),
        device.name(),
        &id,
        &asset_type,
        &body,
        "",
    );
    document(
        printer.as_ref(),
        if stored { "<success/>" } else { "<failure/>" }.to_string(),
    )
}

fn serve_file_or_invalid(
    state: &HttpState,
    printer: &dyn Printer,
    uri: &str,
) -> Response<Body> {
    match state.files.fetch(uri) {
        FileFetch::File(file) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, file.content_type)
            .body(Body::from(file.bytes.clone()))
            .expect("static response headers are valid"),
        FileFetch::NotFound => {
            (StatusCode::NOT_FOUND, "File not found").into_response()
        }
        FileFetch::NotRegistered => error_document(
            state,
            printer,
            ErrorCode::Unsupported,
            &format!("The following path is invalid: {uri}"),
        ),
    }
}

async fn fallback(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(queries): Query<HashMap<String, String>>,
    uri: Uri,
) -> Response<Body> {
    let printer = printer_for(&headers, &queries);
    serve_file_or_invalid(&state, printer.as_ref(), uri.path())
}

#[cfg(test)]
mod tests {
    use super::devices_and_path;

    #[test]
    fn device_prefixing() {
        assert_eq!(devices_and_path(None, None), "//Devices/Device");
        assert_eq!(
            devices_and_path(None, Some("mill-1")),
            "//Devices/Device[@name=\"mill-1\"]"
        );
        assert_eq!(
            devices_and_path(Some("//Linear"), Some("mill-1")),
            "//Devices/Device[@name=\"mill-1\"]//Linear"
        );
        assert_eq!(
            devices_and_path(Some("//Linear|//Rotary"), Some("m")),
            "//Devices/Device[@name=\"m\"]//Linear|//Devices/Device[@name=\"m\"]//Rotary"
        );
        assert_eq!(devices_and_path(Some("//DataItem"), None), "//DataItem");
    }
}
