// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Query-parameter validation.
//!
//! Validation failures become MTConnect error documents with an HTTP 200
//! body, matching the protocol's historical behavior; [`RequestError`] is
//! the typed carrier between a handler and the error printer.

use std::collections::HashMap;

use thiserror::Error;

use crate::printer::ErrorCode;

/// A request that failed validation, with the document error code to render.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{}: {message}", .code.as_str())]
pub struct RequestError {
    /// The enumerated document error code.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl RequestError {
    /// Build an error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Minimum bound behavior: error below the bound, or clamp up to it.
#[derive(Debug, Clone, Copy)]
pub enum Min {
    /// Values below the bound are an OUT_OF_RANGE error.
    Error(u64),
    /// Values below the bound are raised to it.
    Clamp(u64),
}

/// Validate an integer query parameter.
///
/// Absent parameters return `Ok(None)`; present ones must be non-negative
/// integers within the given bounds.
///
/// # Errors
/// `QUERY_ERROR` for an empty value, `OUT_OF_RANGE` for anything
/// non-numeric or out of bounds.
pub fn int_param(
    queries: &HashMap<String, String>,
    name: &str,
    min: Min,
    max: Option<u64>,
) -> Result<Option<u64>, RequestError> {
    let Some(raw) = queries.get(name) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Err(RequestError::new(
            ErrorCode::QueryError,
            format!("'{name}' cannot be empty."),
        ));
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RequestError::new(
            ErrorCode::OutOfRange,
            format!("'{name}' must be a positive integer."),
        ));
    }
    let value: u64 = raw.parse().map_err(|_| {
        RequestError::new(
            ErrorCode::OutOfRange,
            format!("'{name}' must be a positive integer."),
        )
    })?;

    match min {
        Min::Error(bound) if value < bound => {
            return Err(RequestError::new(
                ErrorCode::OutOfRange,
                format!("'{name}' must be greater than or equal to {bound}."),
            ));
        }
        Min::Clamp(bound) if value < bound => return Ok(Some(bound)),
        _ => {}
    }
    if let Some(bound) = max {
        if value > bound {
            return Err(RequestError::new(
                ErrorCode::OutOfRange,
                format!("'{name}' must be less than or equal to {bound}."),
            ));
        }
    }
    Ok(Some(value))
}

/// The streamed-response interval: `frequency`, with `interval` as the 1.2
/// conversion. Bounded by the slowest representable period.
///
/// # Errors
/// Propagates the [`int_param`] validation errors.
pub fn interval_param(
    queries: &HashMap<String, String>,
) -> Result<Option<u64>, RequestError> {
    const SLOWEST: u64 = 2_147_483_646;
    if let Some(frequency) = int_param(queries, "frequency", Min::Clamp(0), Some(SLOWEST))? {
        return Ok(Some(frequency));
    }
    int_param(queries, "interval", Min::Clamp(0), Some(SLOWEST))
}

/// The streamed-response heartbeat in milliseconds: default 10 000, bounds
/// 10..600 000.
///
/// # Errors
/// Propagates the [`int_param`] validation errors.
pub fn heartbeat_param(queries: &HashMap<String, String>) -> Result<u64, RequestError> {
    Ok(int_param(queries, "heartbeat", Min::Error(10), Some(600_000))?.unwrap_or(10_000))
}
