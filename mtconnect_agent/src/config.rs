// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Agent configuration.
//!
//! A TOML file with the agent section at the top level and one `[[Adapters]]`
//! table per adapter. Key names and defaults follow the classic agent
//! configuration surface (`Port`, `BufferSize`, `LegacyTimeout` in seconds,
//! `ReconnectInterval` in milliseconds, ...).

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors; all fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read configuration {}: {source}", .path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

fn default_port() -> u16 {
    5000
}

fn default_buffer_size() -> u32 {
    17
}

fn default_max_assets() -> usize {
    1024
}

fn default_checkpoint_frequency() -> u64 {
    1000
}

fn default_legacy_timeout() -> u64 {
    600
}

fn default_reconnect_interval() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_adapter_port() -> u16 {
    7878
}

fn default_adapter_host() -> String {
    "localhost".to_string()
}

/// One `[[Adapters]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct AdapterConfig {
    /// Adapter host.
    #[serde(default = "default_adapter_host")]
    pub host: String,
    /// Adapter port.
    #[serde(default = "default_adapter_port")]
    pub port: u16,
    /// Device this adapter feeds; defaults to the first device in the model.
    #[serde(default)]
    pub device: Option<String>,
    /// Further devices addressable through `device:key` routing.
    #[serde(default)]
    pub additional_devices: Vec<String>,
    /// Idle timeout in seconds when the peer has no heartbeats; falls back
    /// to the agent-wide value.
    #[serde(default)]
    pub legacy_timeout: Option<u64>,
    /// Reconnect delay in milliseconds; falls back to the agent-wide value.
    #[serde(default)]
    pub reconnect_interval: Option<u64>,
    /// Keep the configured uuid even when the adapter pushes one.
    #[serde(default)]
    pub preserve_uuid: Option<bool>,
    /// Drop values equal to the previous value of the same data item.
    #[serde(default)]
    pub filter_duplicates: bool,
    /// Drive AVAILABILITY from the connection state.
    #[serde(default)]
    pub auto_available: bool,
    /// Replace reported timestamps with the agent clock.
    #[serde(default)]
    pub ignore_timestamps: Option<bool>,
    /// Apply native-unit conversion to numeric values.
    #[serde(default)]
    pub conversion_required: Option<bool>,
    /// Interpret reported timestamps as relative offsets.
    #[serde(default)]
    pub relative_time: bool,
    /// Upcase event values.
    #[serde(default)]
    pub upcase_data_item_value: Option<bool>,
}

/// A static-file registration: a URI prefix served from a file or directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct FileConfig {
    /// URI the content is served under.
    pub uri: String,
    /// File or directory backing it.
    pub path: PathBuf,
}

/// The agent configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct AgentSettings {
    /// HTTP listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// HTTP bind address; all interfaces when unset.
    #[serde(default)]
    pub server_ip: Option<String>,
    /// Ring-buffer size as a power-of-two exponent.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
    /// Asset store bound.
    #[serde(default = "default_max_assets")]
    pub max_assets: usize,
    /// Periodic checkpoint spacing in sequence numbers.
    #[serde(default = "default_checkpoint_frequency")]
    pub checkpoint_frequency: u64,
    /// Agent-wide default for the adapter idle timeout, in seconds.
    #[serde(default = "default_legacy_timeout")]
    pub legacy_timeout: u64,
    /// Agent-wide default for the adapter reconnect delay, in milliseconds.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Agent-wide default for `PreserveUUID`.
    #[serde(default = "default_true")]
    pub preserve_uuid: bool,
    /// Agent-wide default for `IgnoreTimestamps`.
    #[serde(default)]
    pub ignore_timestamps: bool,
    /// Agent-wide default for `ConversionRequired`.
    #[serde(default = "default_true")]
    pub conversion_required: bool,
    /// Agent-wide default for `UpcaseDataItemValue`.
    #[serde(default = "default_true")]
    pub upcase_data_item_value: bool,
    /// Allow HTTP PUT/POST of observations and adapter commands.
    #[serde(default)]
    pub allow_put: bool,
    /// Hosts allowed to PUT, comma or space separated. Empty allows all.
    #[serde(default)]
    pub allow_put_from: Option<String>,
    /// Path to the device model file.
    pub devices: PathBuf,
    /// Static files to serve.
    #[serde(default)]
    pub files: Vec<FileConfig>,
    /// The adapters to connect to.
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
}

impl AgentSettings {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// The parsed PUT allow-list; empty means any source address.
    #[must_use]
    pub fn put_allowed_hosts(&self) -> HashSet<IpAddr> {
        self.allow_put_from
            .as_deref()
            .unwrap_or("")
            .split([',', ' '])
            .filter_map(|host| host.trim().parse().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::AgentSettings;

    #[test]
    fn minimal_config_uses_defaults() {
        let settings: AgentSettings = toml::from_str("Devices = \"devices.json\"").unwrap();
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.buffer_size, 17);
        assert_eq!(settings.max_assets, 1024);
        assert_eq!(settings.checkpoint_frequency, 1000);
        assert_eq!(settings.legacy_timeout, 600);
        assert_eq!(settings.reconnect_interval, 10_000);
        assert!(settings.preserve_uuid);
        assert!(!settings.allow_put);
        assert!(settings.adapters.is_empty());
    }

    #[test]
    fn adapters_and_put_hosts_parse() {
        let settings: AgentSettings = toml::from_str(
            r#"
            Devices = "devices.json"
            AllowPut = true
            AllowPutFrom = "127.0.0.1, 10.0.0.5"

            [[Adapters]]
            Host = "mill.local"
            Port = 7878
            Device = "mill-1"
            FilterDuplicates = true
            AdditionalDevices = ["mill-2"]

            [[Files]]
            Uri = "/schemas"
            Path = "./schemas"
            "#,
        )
        .unwrap();
        assert_eq!(settings.adapters.len(), 1);
        let adapter = &settings.adapters[0];
        assert_eq!(adapter.host, "mill.local");
        assert_eq!(adapter.device.as_deref(), Some("mill-1"));
        assert!(adapter.filter_duplicates);
        assert_eq!(adapter.additional_devices, vec!["mill-2".to_string()]);
        assert_eq!(settings.put_allowed_hosts().len(), 2);
        assert_eq!(settings.files.len(), 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<AgentSettings>("Devices = \"d\"\nBogus = 1").is_err());
    }
}
