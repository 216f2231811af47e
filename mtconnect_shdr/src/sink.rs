// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The interface an adapter routes into.
//!
//! The agent implements [`AdapterSink`]; the adapter layer stays unaware of
//! buffers, checkpoints, and asset bookkeeping and only calls through this
//! trait. All methods are synchronous and quick: they take short-lived locks
//! and never block on I/O.

use std::sync::Arc;

use mtconnect_core::SourceId;
use mtconnect_core::device_model::DataItem;

/// A device identity field settable by an adapter protocol command.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMetadata {
    /// New device uuid; ignored when the configuration pinned it.
    Uuid(String),
    /// Manufacturer name.
    Manufacturer(String),
    /// Station identifier.
    Station(String),
    /// Serial number.
    SerialNumber(String),
    /// Description text.
    Description(String),
    /// Name the source knows the device by.
    NativeName(String),
}

/// What an adapter needs from the agent.
pub trait AdapterSink: Send + Sync {
    /// True when a device with this name exists.
    fn device_exists(&self, device: &str) -> bool;

    /// The device's current uuid.
    fn device_uuid(&self, device: &str) -> Option<String>;

    /// Canonical device name for a `* device:` command argument (name or
    /// uuid).
    fn resolve_device(&self, name_or_uuid: &str) -> Option<String>;

    /// Look up a data item on a device by adapter key (source, name, or id).
    fn data_item(&self, device: &str, key: &str) -> Option<Arc<DataItem>>;

    /// Append an observation; returns the assigned sequence number.
    fn add_observation(&self, data_item: &Arc<DataItem>, value: &str, time: &str) -> u64;

    /// Store or replace an asset.
    fn add_asset(
        &self,
        device: &str,
        asset_id: &str,
        asset_type: &str,
        body: &str,
        time: &str,
    ) -> bool;

    /// Patch fields of an existing asset.
    fn update_asset(
        &self,
        device: &str,
        asset_id: &str,
        patches: &[(String, String)],
        time: &str,
    ) -> bool;

    /// Mark an asset removed.
    fn remove_asset(&self, device: &str, asset_id: &str, time: &str) -> bool;

    /// Mark every asset of a type removed.
    fn remove_all_assets(&self, device: &str, asset_type: &str, time: &str) -> bool;

    /// The probe document for a device, for the `* PROBE` command.
    fn probe_document(&self, device: &str) -> Option<String>;

    /// Apply a device identity update.
    fn update_device_metadata(&self, device: &str, update: DeviceMetadata) -> bool;

    /// The adapter's connection came up.
    fn adapter_connected(&self, source: SourceId, devices: &[String], auto_available: bool);

    /// The adapter's connection went down.
    fn adapter_disconnected(&self, source: SourceId, devices: &[String], auto_available: bool);
}
