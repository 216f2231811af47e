// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The SHDR line grammar.
//!
//! Data frames are pipe-delimited: a timestamp field, then key/value content
//! whose shape depends on the data item. Lines beginning with `*` are
//! protocol commands. This module only tokenizes; interpretation against the
//! device model happens in [`crate::adapter`].

/// A parsed `*` protocol command line.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCommand {
    /// `* PONG <freq-ms>`: heartbeat answer, with the period when present.
    Pong(Option<u64>),
    /// `* PING`: a peer-initiated heartbeat probe.
    Ping,
    /// `* PROBE`: the peer wants the probe document on this socket.
    Probe,
    /// `* uuid: <value>`: set the device uuid (unless pinned).
    Uuid(String),
    /// `* manufacturer: <value>`.
    Manufacturer(String),
    /// `* station: <value>`.
    Station(String),
    /// `* serialNumber: <value>`.
    SerialNumber(String),
    /// `* description: <value>`.
    Description(String),
    /// `* nativeName: <value>`.
    NativeName(String),
    /// `* calibration: name|factor|offset[|name|factor|offset]*`.
    Calibration(String),
    /// `* conversionRequired: <bool>`.
    ConversionRequired(bool),
    /// `* relativeTime: <bool>`.
    RelativeTime(bool),
    /// `* realTime: <bool>`.
    RealTime(bool),
    /// `* device: <name-or-uuid>`: reroute this adapter's default device.
    Device(String),
    /// Anything else; logged and ignored.
    Unknown(String),
}

fn is_true(value: &str) -> bool {
    value == "yes" || value == "true" || value == "1"
}

impl AdapterCommand {
    /// Parse a line that begins with `*`.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        if let Some(rest) = line.strip_prefix("* PONG") {
            let freq = rest
                .trim()
                .split_ascii_whitespace()
                .next()
                .and_then(|token| token.parse().ok());
            return AdapterCommand::Pong(freq);
        }
        if line.trim_end() == "* PING" {
            return AdapterCommand::Ping;
        }
        if line.trim_end() == "* PROBE" {
            return AdapterCommand::Probe;
        }

        // `* key: value` with the colon searched from the third byte on.
        let Some(colon) = line[2.min(line.len())..].find(':').map(|i| i + 2) else {
            return AdapterCommand::Unknown(line.to_string());
        };
        let key = line[2..colon].trim();
        let value = line[colon + 1..].trim().to_string();
        match key {
            "uuid" => AdapterCommand::Uuid(value),
            "manufacturer" => AdapterCommand::Manufacturer(value),
            "station" => AdapterCommand::Station(value),
            "serialNumber" => AdapterCommand::SerialNumber(value),
            "description" => AdapterCommand::Description(value),
            "nativeName" => AdapterCommand::NativeName(value),
            "calibration" => AdapterCommand::Calibration(value),
            "conversionRequired" => AdapterCommand::ConversionRequired(is_true(&value)),
            "relativeTime" => AdapterCommand::RelativeTime(is_true(&value)),
            "realTime" => AdapterCommand::RealTime(is_true(&value)),
            "device" => AdapterCommand::Device(value),
            _ => AdapterCommand::Unknown(line.to_string()),
        }
    }
}

/// Split a `device:key` routing prefix off an adapter key.
#[must_use]
pub fn split_device_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once(':') {
        Some((device, rest)) => (Some(device), rest),
        None => (None, key),
    }
}

/// Trim the whitespace the wire allows around values: spaces, tabs, and any
/// carriage return left by CRLF framing.
#[must_use]
pub fn trim_value(value: &str) -> &str {
    value.trim_matches([' ', '\r', '\t'])
}

/// The asset directives that may appear in the key position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetDirective {
    /// `@ASSET@`: upsert.
    Upsert,
    /// `@UPDATE_ASSET@`: field patches.
    Update,
    /// `@REMOVE_ASSET@`: mark one removed.
    Remove,
    /// `@REMOVE_ALL_ASSETS@`: mark a type removed.
    RemoveAll,
}

impl AssetDirective {
    /// Recognize an asset directive key.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "@ASSET@" => Some(AssetDirective::Upsert),
            "@UPDATE_ASSET@" => Some(AssetDirective::Update),
            "@REMOVE_ASSET@" => Some(AssetDirective::Remove),
            "@REMOVE_ALL_ASSETS@" => Some(AssetDirective::RemoveAll),
            _ => None,
        }
    }
}

/// The marker an `@ASSET@` frame uses to open a multi-line body.
pub const MULTILINE_MARKER: &str = "--multiline--";

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::{AdapterCommand, split_device_key, trim_value};

    #[test]
    fn pong_with_frequency() {
        assert_eq!(
            AdapterCommand::parse("* PONG 10000"),
            AdapterCommand::Pong(Some(10000))
        );
        assert_eq!(AdapterCommand::parse("* PONG"), AdapterCommand::Pong(None));
        assert_eq!(
            AdapterCommand::parse("* PONG abc"),
            AdapterCommand::Pong(None)
        );
    }

    #[test_case("* uuid: XXX-1234", AdapterCommand::Uuid("XXX-1234".to_string()); "uuid")]
    #[test_case("* manufacturer: Acme", AdapterCommand::Manufacturer("Acme".to_string()); "manufacturer")]
    #[test_case("* serialNumber: 42", AdapterCommand::SerialNumber("42".to_string()); "serial number")]
    #[test_case("* conversionRequired: no", AdapterCommand::ConversionRequired(false); "conversion off")]
    #[test_case("* relativeTime: yes", AdapterCommand::RelativeTime(true); "relative time")]
    #[test_case("* realTime: 1", AdapterCommand::RealTime(true); "real time")]
    #[test_case("* device: mill-2", AdapterCommand::Device("mill-2".to_string()); "device reroute")]
    fn metadata_commands(line: &str, expected: AdapterCommand) {
        assert_eq!(AdapterCommand::parse(line), expected);
    }

    #[test]
    fn calibration_keeps_the_raw_triple_list() {
        assert_eq!(
            AdapterCommand::parse("* calibration: Xact|0.01|0.0|Yact|0.01|0.0"),
            AdapterCommand::Calibration("Xact|0.01|0.0|Yact|0.01|0.0".to_string())
        );
    }

    #[test]
    fn unknown_commands_are_preserved_for_logging() {
        assert_eq!(
            AdapterCommand::parse("* shdrVersion: 2"),
            AdapterCommand::Unknown("* shdrVersion: 2".to_string())
        );
        assert_eq!(
            AdapterCommand::parse("* NOTACOMMAND"),
            AdapterCommand::Unknown("* NOTACOMMAND".to_string())
        );
    }

    #[test]
    fn device_key_routing() {
        assert_eq!(split_device_key("mill-2:Xact"), (Some("mill-2"), "Xact"));
        assert_eq!(split_device_key("Xact"), (None, "Xact"));
    }

    #[test]
    fn value_trimming() {
        assert_eq!(trim_value(" READY\r"), "READY");
        assert_eq!(trim_value("\tUNAVAILABLE "), "UNAVAILABLE");
    }
}
