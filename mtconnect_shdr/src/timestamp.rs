// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter timestamp handling.
//!
//! Three modes, selected per adapter by configuration or the
//! `* relativeTime:` protocol command:
//!
//! - *absolute*: the reported time is used verbatim;
//! - *ignore*: the agent's wall clock replaces whatever was reported;
//! - *relative*: the first reported time anchors a base against the agent's
//!   clock, and later times are offsets from it, given either as ISO
//!   timestamps or as floating-point milliseconds. The anchor resets on
//!   every disconnect.
//!
//! Alongside the timestamp string, extraction yields a whole-second offset
//! used by minimum-period filters.

use chrono::{DateTime, SecondsFormat, Utc};

/// How the timestamp field of a data frame is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMode {
    /// Use the reported timestamp as-is.
    #[default]
    Absolute,
    /// Discard the reported timestamp; stamp with the agent clock.
    Ignore,
    /// Interpret reported times as offsets from a per-connection base.
    Relative,
}

#[derive(Debug, Clone, Copy)]
struct RelativeBase {
    /// Agent wall clock when the first frame arrived.
    wall: DateTime<Utc>,
    /// The first frame's own time, in microseconds.
    offset_micros: i64,
    /// True when offsets arrive as ISO timestamps rather than milliseconds.
    parse_iso: bool,
}

/// Per-connection timestamp state.
#[derive(Debug, Default)]
pub struct TimeTracker {
    base: Option<RelativeBase>,
}

impl TimeTracker {
    /// A tracker with no anchored base.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the relative base; called on every disconnect.
    pub fn reset(&mut self) {
        self.base = None;
    }

    /// Resolve a reported time field into the timestamp to record and the
    /// whole-second offset used by period filters.
    pub fn extract(&mut self, field: &str, mode: TimeMode) -> (String, Option<f64>) {
        match mode {
            TimeMode::Relative => self.extract_relative(field),
            _ if field.is_empty() || mode == TimeMode::Ignore => {
                let now = Utc::now();
                (format_timestamp(now), Some(whole_seconds(now)))
            }
            TimeMode::Absolute | TimeMode::Ignore => {
                let offset = parse_micros(field).map(|micros| (micros / 1_000_000) as f64);
                (field.to_string(), offset)
            }
        }
    }

    fn extract_relative(&mut self, field: &str) -> (String, Option<f64>) {
        let offset_micros = match &self.base {
            None => {
                let parse_iso = field.contains('T');
                let offset_micros = if parse_iso {
                    parse_micros(field).unwrap_or(0)
                } else {
                    millis_field_to_micros(field)
                };
                self.base = Some(RelativeBase {
                    wall: Utc::now(),
                    offset_micros,
                    parse_iso,
                });
                0
            }
            Some(base) => {
                let reported = if base.parse_iso {
                    parse_micros(field).unwrap_or(base.offset_micros)
                } else {
                    millis_field_to_micros(field)
                };
                reported - base.offset_micros
            }
        };

        let base = self.base.as_ref().expect("base anchored above");
        let stamped = base.wall + chrono::Duration::microseconds(offset_micros);
        (format_timestamp(stamped), Some((offset_micros / 1_000_000) as f64))
    }
}

fn millis_field_to_micros(field: &str) -> i64 {
    let millis: f64 = field.trim().parse().unwrap_or(0.0);
    (millis * 1000.0) as i64
}

/// Microseconds since the epoch of an ISO-8601 timestamp.
fn parse_micros(field: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(field.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_micros())
}

fn whole_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp() as f64
}

/// The agent's canonical timestamp form: UTC with microsecond precision.
#[must_use]
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The current wall-clock time in canonical form.
#[must_use]
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}
