// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Immutable, timestamped values tied to data items.
//!
//! An [`Observation`] is created once, when the ring buffer assigns it a
//! sequence number, and never mutated afterwards. Construction is the single
//! place where a raw wire value becomes a stored value: reset-trigger
//! suffixes are split off and substituted first, then unit conversion is
//! applied, then the value is parsed into its shape. Condition observations
//! form a singly-linked chain of currently-active entries through
//! [`Observation::previous`]; chain edits are copy-on-write and produce new
//! spine nodes that share the unchanged tail.

use std::fmt;
use std::sync::Arc;

use crate::device_model::data_item::{Category, DataItem, Representation};
use crate::device_model::units;

/// Severity level of a condition observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// No active fault or warning.
    Normal,
    /// Degraded but operational.
    Warning,
    /// Active fault.
    Fault,
    /// The condition state is not known.
    Unavailable,
}

impl Level {
    /// Parse a level token case-insensitively. Anything unrecognized is
    /// treated as `Unavailable`, matching the adapter protocol's leniency.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        if token.eq_ignore_ascii_case("normal") {
            Level::Normal
        } else if token.eq_ignore_ascii_case("warning") {
            Level::Warning
        } else if token.eq_ignore_ascii_case("fault") {
            Level::Fault
        } else {
            Level::Unavailable
        }
    }

    /// The document form of the level.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Normal => "Normal",
            Level::Warning => "Warning",
            Level::Fault => "Fault",
            Level::Unavailable => "Unavailable",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed fields of a condition observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionState {
    /// Severity level.
    pub level: Level,
    /// Source-native alarm code keying the active-condition chain.
    pub native_code: Option<String>,
    /// Source-native severity, reported verbatim.
    pub native_severity: Option<String>,
    /// Qualifier such as `HIGH` or `LOW`.
    pub qualifier: Option<String>,
    /// Human-readable description.
    pub text: Option<String>,
}

/// Parsed fields of a time-series observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    /// Number of samples reported by the source.
    pub count: u32,
    /// Sample rate in hertz, when given.
    pub rate: Option<f64>,
    /// The samples, unit conversion already applied.
    pub samples: Vec<f64>,
}

/// The shape of an observation's value, determined by its data item.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    /// The sentinel for a value that is not currently known.
    Unavailable,
    /// A numeric sample, unit conversion already applied.
    Sample(f64),
    /// An event (or a sample that did not parse as a number).
    Text(String),
    /// A legacy MESSAGE event carrying a native code.
    Message {
        /// Source-native code.
        native_code: Option<String>,
        /// Message text.
        text: String,
    },
    /// A legacy ALARM event.
    Alarm {
        /// Alarm code.
        code: String,
        /// Source-native code.
        native_code: String,
        /// Severity, reported verbatim.
        severity: String,
        /// Alarm state.
        state: String,
        /// Alarm text.
        text: String,
    },
    /// A waveform of samples.
    TimeSeries(TimeSeries),
    /// A condition entry.
    Condition(ConditionState),
    /// An ASSET_CHANGED / ASSET_REMOVED event (`type|id` on the wire).
    AssetEvent {
        /// Asset type, e.g. `CuttingTool`.
        asset_type: String,
        /// Asset id, or `UNAVAILABLE` when cleared.
        asset_id: String,
    },
}

/// One timestamped value of one data item, as stored in the ring buffer.
#[derive(Debug, Clone)]
pub struct Observation {
    data_item: Arc<DataItem>,
    sequence: u64,
    timestamp: String,
    duration: Option<String>,
    reset_triggered: Option<String>,
    value: ObservationValue,
    previous: Option<Arc<Observation>>,
}

impl Observation {
    /// Parse a raw adapter/HTTP value into an observation.
    ///
    /// `time` may carry an `@duration` suffix. A `value:trigger` suffix on a
    /// reset-trigger data item is split off (substituting the initial value
    /// when one is configured) strictly before unit conversion is applied,
    /// so both ingestion paths store the same thing for the same wire value.
    #[must_use]
    pub fn new(data_item: Arc<DataItem>, sequence: u64, time: &str, value: &str) -> Self {
        let (timestamp, duration) = match time.split_once('@') {
            Some((ts, dur)) => (ts.to_string(), Some(dur.to_string())),
            None => (time.to_string(), None),
        };

        let mut reset_triggered = None;
        let mut value = value;
        let substituted;
        if data_item.reset_trigger().is_some() {
            if let Some((v, trigger)) = value.split_once(':') {
                reset_triggered = Some(trigger.to_string());
                value = match data_item.initial_value() {
                    Some(initial) => initial,
                    None => {
                        substituted = v.to_string();
                        &substituted
                    }
                };
            }
        }

        let value = Self::parse_value(&data_item, value);
        Self {
            data_item,
            sequence,
            timestamp,
            duration,
            reset_triggered,
            value,
            previous: None,
        }
    }

    fn parse_value(data_item: &DataItem, raw: &str) -> ObservationValue {
        if data_item.category() == Category::Condition {
            return ObservationValue::Condition(Self::parse_condition(raw));
        }
        if raw == crate::UNAVAILABLE {
            return ObservationValue::Unavailable;
        }
        if data_item.representation() == Representation::TimeSeries {
            return ObservationValue::TimeSeries(Self::parse_time_series(data_item, raw));
        }
        if data_item.is_alarm() {
            return Self::parse_alarm(raw);
        }
        if data_item.is_message() {
            return Self::parse_message(raw);
        }
        if data_item.is_asset_changed() || data_item.is_asset_removed() {
            let (asset_type, asset_id) = raw.rsplit_once('|').unwrap_or(("", raw));
            return ObservationValue::AssetEvent {
                asset_type: asset_type.to_string(),
                asset_id: asset_id.to_string(),
            };
        }
        let converted = units::convert_value(data_item, raw);
        if data_item.category() == Category::Sample {
            if let Ok(number) = converted.trim().parse::<f64>() {
                return ObservationValue::Sample(number);
            }
        }
        ObservationValue::Text(converted)
    }

    // LEVEL|NATIVE_CODE|NATIVE_SEVERITY|QUALIFIER|description
    fn parse_condition(raw: &str) -> ConditionState {
        let mut fields = raw.split('|');
        let level = Level::parse(fields.next().unwrap_or(""));
        let non_empty = |s: Option<&str>| s.filter(|v| !v.is_empty()).map(str::to_string);
        ConditionState {
            level,
            native_code: non_empty(fields.next()),
            native_severity: non_empty(fields.next()),
            qualifier: non_empty(fields.next()),
            text: non_empty(fields.next()),
        }
    }

    // COUNT|RATE|v1 v2 v3 ...
    fn parse_time_series(data_item: &DataItem, raw: &str) -> TimeSeries {
        let (header, samples) = raw.rsplit_once('|').unwrap_or(("", raw));
        let mut fields = header.split('|');
        let count = fields.next().unwrap_or("0").trim().parse().unwrap_or(0);
        let rate = fields
            .next()
            .filter(|r| !r.is_empty())
            .and_then(|r| r.trim().parse().ok());
        let samples = samples
            .split_ascii_whitespace()
            .filter_map(|v| v.parse().ok())
            .map(|v| units::convert_f64(data_item, v))
            .collect();
        TimeSeries {
            count,
            rate,
            samples,
        }
    }

    // CODE|NATIVECODE|SEVERITY|STATE|description
    fn parse_alarm(raw: &str) -> ObservationValue {
        let (fields, text) = raw.rsplit_once('|').unwrap_or((raw, ""));
        let mut fields = fields.split('|');
        let mut next = || fields.next().unwrap_or("").to_string();
        ObservationValue::Alarm {
            code: next(),
            native_code: next(),
            severity: next(),
            state: next(),
            text: text.to_string(),
        }
    }

    // NATIVECODE|text
    fn parse_message(raw: &str) -> ObservationValue {
        let (native_code, text) = raw.rsplit_once('|').unwrap_or(("", raw));
        ObservationValue::Message {
            native_code: (!native_code.is_empty()).then(|| native_code.to_string()),
            text: text.to_string(),
        }
    }

    /// The data item this observation belongs to.
    #[must_use]
    pub fn data_item(&self) -> &Arc<DataItem> {
        &self.data_item
    }

    /// Sequence number assigned by the ring buffer.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// ISO-8601 timestamp, without any duration suffix.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// The `@duration` suffix of the timestamp, when present.
    #[must_use]
    pub fn duration(&self) -> Option<&str> {
        self.duration.as_deref()
    }

    /// The reset trigger name, when the raw value carried one.
    #[must_use]
    pub fn reset_triggered(&self) -> Option<&str> {
        self.reset_triggered.as_deref()
    }

    /// The parsed value.
    #[must_use]
    pub fn value(&self) -> &ObservationValue {
        &self.value
    }

    /// Condition severity level; `None` for non-condition observations.
    #[must_use]
    pub fn level(&self) -> Option<Level> {
        match &self.value {
            ObservationValue::Condition(c) => Some(c.level),
            _ => None,
        }
    }

    /// Native code of a condition entry, empty when absent.
    #[must_use]
    pub fn native_code(&self) -> &str {
        match &self.value {
            ObservationValue::Condition(c) => c.native_code.as_deref().unwrap_or(""),
            _ => "",
        }
    }

    /// True when the value is the UNAVAILABLE sentinel (for conditions, when
    /// the level is unavailable).
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        match &self.value {
            ObservationValue::Unavailable => true,
            ObservationValue::Condition(c) => c.level == Level::Unavailable,
            _ => false,
        }
    }

    /// The comparable value string, as the original wire value would read.
    ///
    /// Asset events compare by asset id; conditions by description text.
    #[must_use]
    pub fn value_string(&self) -> String {
        match &self.value {
            ObservationValue::Unavailable => crate::UNAVAILABLE.to_string(),
            ObservationValue::Sample(v) => format_number(*v),
            ObservationValue::Text(s) => s.clone(),
            ObservationValue::Message { text, .. } | ObservationValue::Alarm { text, .. } => {
                text.clone()
            }
            ObservationValue::TimeSeries(ts) => {
                let mut out = String::new();
                for (i, v) in ts.samples.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    out.push_str(&format_number(*v));
                }
                out
            }
            ObservationValue::Condition(c) => c.text.clone().unwrap_or_default(),
            ObservationValue::AssetEvent { asset_id, .. } => asset_id.clone(),
        }
    }

    /// The previous entry in this condition chain.
    #[must_use]
    pub fn previous(&self) -> Option<&Arc<Observation>> {
        self.previous.as_ref()
    }

    /// Iterate the chain from this entry (the head) towards the tail.
    pub fn chain(self: &Arc<Self>) -> impl Iterator<Item = Arc<Observation>> {
        ChainIter {
            next: Some(self.clone()),
        }
    }

    /// Find the chain entry with the given native code.
    #[must_use]
    pub fn find_code(self: &Arc<Self>, code: &str) -> Option<Arc<Observation>> {
        self.chain().find(|entry| entry.native_code() == code)
    }

    /// Copy-on-write removal of the chain entry with the given native code.
    ///
    /// Clones the spine down to the removed entry and shares the tail beyond
    /// it. Returns `None` when removal empties the chain, and the unchanged
    /// chain when no entry matches.
    #[must_use]
    pub fn without_code(self: &Arc<Self>, code: &str) -> Option<Arc<Observation>> {
        if self.native_code() == code {
            return self.previous.clone();
        }
        let tail = self.previous.as_ref()?.without_code(code);
        let mut head = (**self).clone();
        head.previous = tail;
        Some(Arc::new(head))
    }

    /// A copy of this observation chained onto `previous`.
    #[must_use]
    pub fn chained_to(self: &Arc<Self>, previous: Option<Arc<Observation>>) -> Arc<Observation> {
        let mut head = (**self).clone();
        head.previous = previous;
        Arc::new(head)
    }

    /// A synthetic NORMAL derived from this condition observation: same data
    /// item, sequence, and timestamp, with code, severity, qualifier, and
    /// text cleared.
    #[must_use]
    pub fn to_normal(&self) -> Arc<Observation> {
        let mut normal = self.clone();
        normal.previous = None;
        normal.value = ObservationValue::Condition(ConditionState {
            level: Level::Normal,
            native_code: None,
            native_severity: None,
            qualifier: None,
            text: None,
        });
        Arc::new(normal)
    }
}

struct ChainIter {
    next: Option<Arc<Observation>>,
}

impl Iterator for ChainIter {
    type Item = Arc<Observation>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.previous.clone();
        Some(current)
    }
}

/// Format a number the way the documents expect: integral values without a
/// trailing fraction, everything else in shortest form.
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}
