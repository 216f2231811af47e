// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The agent: owns the model, the buffer, and the asset store, and wires
//! adapters to devices.
//!
//! Implements [`AdapterSink`] so adapter tasks can route into the engine,
//! primes every data item UNAVAILABLE at startup, and fans availability out
//! on adapter connect/disconnect.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use mtconnect_core::asset::AssetStore;
use mtconnect_core::buffer::ObservationBuffer;
use mtconnect_core::device_model::data_item::DataItem;
use mtconnect_core::device_model::{Device, DeviceModel, ModelError};
use mtconnect_core::{CONDITION_UNAVAILABLE, SourceId, UNAVAILABLE};
use mtconnect_shdr::adapter::{Adapter, AdapterOptions};
use mtconnect_shdr::connector::{CommandSender, Connector, ConnectorOptions};
use mtconnect_shdr::sink::{AdapterSink, DeviceMetadata};
use mtconnect_shdr::timestamp::now_timestamp;

use crate::printer::{DocumentInfo, Printer, XmlPrinter};

struct AdapterEntry {
    source: SourceId,
    devices: Vec<String>,
    commands: CommandSender,
}

/// The assembled agent.
pub struct Agent {
    instance_id: u64,
    model: DeviceModel,
    buffer: ObservationBuffer,
    assets: AssetStore,
    adapters: Mutex<Vec<AdapterEntry>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Assemble the agent and prime every data item UNAVAILABLE (or its
    /// constant value).
    ///
    /// # Errors
    /// Returns a [`ModelError`] when the device model is invalid.
    pub fn new(
        devices: Vec<Arc<Device>>,
        buffer_size_exponent: u32,
        checkpoint_frequency: u64,
        max_assets: usize,
    ) -> Result<Arc<Self>, ModelError> {
        let model = DeviceModel::new(devices)?;
        let agent = Arc::new(Self {
            instance_id: u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0),
            model,
            buffer: ObservationBuffer::new(buffer_size_exponent, checkpoint_frequency),
            assets: AssetStore::new(max_assets),
            adapters: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });
        agent.prime_unavailable();
        Ok(agent)
    }

    /// Every data item starts UNAVAILABLE; single-valued constrained items
    /// start at their constant.
    fn prime_unavailable(&self) {
        let time = now_timestamp();
        for device in self.model.devices() {
            let mut items: Vec<&Arc<DataItem>> = device.data_items().collect();
            items.sort_by(|a, b| a.id().cmp(b.id()));
            for item in items {
                let value = if item.is_condition() {
                    CONDITION_UNAVAILABLE
                } else if let Some(constant) = item.constant_value() {
                    constant
                } else {
                    UNAVAILABLE
                };
                self.buffer.append(item, value, &time);
            }
        }
    }

    /// The unique id of this agent instance (its start time, in seconds).
    #[must_use]
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// The device model.
    #[must_use]
    pub fn model(&self) -> &DeviceModel {
        &self.model
    }

    /// The observation buffer.
    #[must_use]
    pub fn buffer(&self) -> &ObservationBuffer {
        &self.buffer
    }

    /// The asset store.
    #[must_use]
    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// The header fields every document carries.
    #[must_use]
    pub fn document_info(&self) -> DocumentInfo {
        let (first, next) = self.buffer.sequence_bounds();
        DocumentInfo {
            instance_id: self.instance_id,
            buffer_size: self.buffer.capacity(),
            first_sequence: first,
            next_sequence: next,
            last_sequence: next.saturating_sub(1),
            max_assets: self.assets.max_assets(),
            asset_count: self.assets.count(),
        }
    }

    /// Append an observation, filling in the wall clock when the caller has
    /// no timestamp. Returns the assigned sequence number.
    pub fn add_to_buffer(&self, data_item: &Arc<DataItem>, value: &str, time: &str) -> u64 {
        if time.is_empty() {
            self.buffer.append(data_item, value, &now_timestamp())
        } else {
            self.buffer.append(data_item, value, time)
        }
    }

    /// Spawn the connector task for one adapter. `preserve_uuid` pins the
    /// uuids of every device the adapter feeds.
    pub fn start_adapter(
        self: &Arc<Self>,
        connector_options: ConnectorOptions,
        mut adapter_options: AdapterOptions,
        preserve_uuid: bool,
    ) -> SourceId {
        let mut devices = vec![adapter_options.device.clone()];
        devices.extend(adapter_options.additional_devices.iter().cloned());
        for name in &devices {
            match self.model.device(name) {
                Some(device) => {
                    device.set_preserve_uuid(preserve_uuid);
                    // A synthesized AVAILABILITY is driven by the connection.
                    if device.availability_added() {
                        adapter_options.auto_available = true;
                    }
                }
                None => log::warn!("adapter references unknown device {name}"),
            }
        }

        let (connector, commands) = Connector::new(connector_options, self.cancel.child_token());
        let source = {
            let mut adapters = self.adapters.lock().unwrap();
            let source = SourceId(adapters.len());
            adapters.push(AdapterEntry {
                source,
                devices,
                commands,
            });
            source
        };

        let agent = self.clone();
        tokio::spawn(async move {
            let mut adapter = Adapter::new(agent.clone(), source, adapter_options);
            match connector.run(&mut adapter).await {
                Ok(()) => log::info!("adapter {source:?} stopped"),
                Err(e) => log::error!("adapter {source:?} stopped permanently: {e}"),
            }
        });
        source
    }

    /// Send a protocol command to every adapter feeding `device`.
    pub fn send_adapter_command(&self, device: &str, command: &str) {
        let adapters = self.adapters.lock().unwrap();
        for entry in adapters.iter() {
            if entry.devices.iter().any(|name| name == device) {
                log::debug!("sending command '{command}' to {device}");
                entry.commands.send(command);
            }
        }
    }

    /// Stop every adapter task.
    pub fn shutdown(&self) {
        log::info!("shutting down adapters");
        self.cancel.cancel();
    }

    fn probe_xml(&self, device_name: &str) -> Option<String> {
        let device = self.model.device(device_name)?.clone();
        let printer = XmlPrinter::new();
        Some(printer.print_probe(
            &self.document_info(),
            std::slice::from_ref(&device),
            &self.assets.counts_by_type(),
        ))
    }

    fn emit_asset_event(
        &self,
        data_item: Option<&Arc<DataItem>>,
        asset_type: &str,
        asset_id: &str,
        time: &str,
    ) {
        if let Some(data_item) = data_item {
            self.add_to_buffer(data_item, &format!("{asset_type}|{asset_id}"), time);
        }
    }
}

fn or_now(time: &str) -> String {
    if time.is_empty() {
        now_timestamp()
    } else {
        time.to_string()
    }
}

impl AdapterSink for Agent {
    fn device_exists(&self, device: &str) -> bool {
        self.model.device(device).is_some()
    }

    fn device_uuid(&self, device: &str) -> Option<String> {
        self.model.device(device).map(|device| device.uuid())
    }

    fn resolve_device(&self, name_or_uuid: &str) -> Option<String> {
        self.model
            .device_by_uuid_or_name(name_or_uuid)
            .map(|device| device.name().to_string())
    }

    fn data_item(&self, device: &str, key: &str) -> Option<Arc<DataItem>> {
        self.model.device(device)?.data_item(key).cloned()
    }

    fn add_observation(&self, data_item: &Arc<DataItem>, value: &str, time: &str) -> u64 {
        self.add_to_buffer(data_item, value, time)
    }

    fn add_asset(
        &self,
        device: &str,
        asset_id: &str,
        asset_type: &str,
        body: &str,
        time: &str,
    ) -> bool {
        let Some(device) = self.model.device(device) else {
            log::warn!("cannot add asset {asset_id}: unknown device {device}");
            return false;
        };
        let time = or_now(time);
        match self
            .assets
            .add(&device.uuid(), asset_id, asset_type, body, &time)
        {
            Ok(result) => {
                let data_item = if result.removed {
                    device.asset_removed()
                } else {
                    device.asset_changed()
                };
                self.emit_asset_event(data_item, asset_type, asset_id, &time);
                true
            }
            Err(e) => {
                log::warn!("asset {asset_id} rejected: {e}");
                false
            }
        }
    }

    fn update_asset(
        &self,
        device: &str,
        asset_id: &str,
        patches: &[(String, String)],
        time: &str,
    ) -> bool {
        let Some(device) = self.model.device(device) else {
            return false;
        };
        let time = or_now(time);
        match self.assets.update(&device.uuid(), asset_id, patches, &time) {
            Ok(updated) => {
                self.emit_asset_event(
                    device.asset_changed(),
                    updated.asset_type(),
                    asset_id,
                    &time,
                );
                true
            }
            Err(e) => {
                log::warn!("cannot update asset {asset_id}: {e}");
                false
            }
        }
    }

    fn remove_asset(&self, device: &str, asset_id: &str, time: &str) -> bool {
        let Some(device) = self.model.device(device) else {
            return false;
        };
        let time = or_now(time);
        match self.assets.remove(asset_id, &time) {
            Ok(removed) => {
                // Clear ASSET_CHANGED first when it still references this id.
                if let Some(changed) = device.asset_changed() {
                    let references_it = self
                        .buffer
                        .latest_for(changed.id())
                        .is_some_and(|latest| latest.value_string() == asset_id);
                    if references_it {
                        self.emit_asset_event(
                            Some(changed),
                            removed.asset_type(),
                            UNAVAILABLE,
                            &time,
                        );
                    }
                }
                self.emit_asset_event(
                    device.asset_removed(),
                    removed.asset_type(),
                    asset_id,
                    &time,
                );
                true
            }
            Err(e) => {
                log::warn!("cannot remove asset {asset_id}: {e}");
                false
            }
        }
    }

    fn remove_all_assets(&self, device: &str, asset_type: &str, time: &str) -> bool {
        let Some(device) = self.model.device(device) else {
            return false;
        };
        let time = or_now(time);
        let changed_reference = device
            .asset_changed()
            .and_then(|changed| self.buffer.latest_for(changed.id()))
            .map(|latest| latest.value_string());

        for removed in self.assets.remove_all(asset_type, &time) {
            self.emit_asset_event(
                device.asset_removed(),
                removed.asset_type(),
                removed.asset_id(),
                &time,
            );
            if changed_reference.as_deref() == Some(removed.asset_id()) {
                self.emit_asset_event(
                    device.asset_changed(),
                    removed.asset_type(),
                    UNAVAILABLE,
                    &time,
                );
            }
        }
        true
    }

    fn probe_document(&self, device: &str) -> Option<String> {
        self.probe_xml(device)
    }

    fn update_device_metadata(&self, device: &str, update: DeviceMetadata) -> bool {
        let Some(device) = self.model.device(device) else {
            return false;
        };
        match update {
            DeviceMetadata::Uuid(uuid) => {
                if device.preserve_uuid() {
                    log::debug!("ignoring adapter uuid for {}, uuid preserved", device.name());
                } else {
                    device.set_uuid(uuid);
                }
            }
            DeviceMetadata::Manufacturer(value) => {
                device.update_info(|info| info.manufacturer = Some(value));
            }
            DeviceMetadata::Station(value) => {
                device.update_info(|info| info.station = Some(value));
            }
            DeviceMetadata::SerialNumber(value) => {
                device.update_info(|info| info.serial_number = Some(value));
            }
            DeviceMetadata::Description(value) => {
                device.update_info(|info| info.description = Some(value));
            }
            DeviceMetadata::NativeName(value) => {
                device.update_info(|info| info.native_name = Some(value));
            }
        }
        true
    }

    fn adapter_connected(&self, _source: SourceId, devices: &[String], auto_available: bool) {
        if !auto_available {
            return;
        }
        let time = now_timestamp();
        for name in devices {
            let Some(device) = self.model.device(name) else {
                continue;
            };
            if let Some(availability) = device.availability() {
                log::debug!("adapter connected, marking {name} available");
                self.add_to_buffer(availability, "AVAILABLE", &time);
            }
        }
    }

    fn adapter_disconnected(&self, source: SourceId, devices: &[String], auto_available: bool) {
        log::debug!("adapter disconnected, setting its values UNAVAILABLE");
        let time = now_timestamp();
        for name in devices {
            let Some(device) = self.model.device(name) else {
                continue;
            };
            for item in device.data_items() {
                let owned = item.data_source() == Some(source)
                    || (auto_available
                        && item.data_source().is_none()
                        && item.type_name() == "AVAILABILITY");
                if !owned {
                    continue;
                }
                let Some(latest) = self.buffer.latest_for(item.id()) else {
                    continue;
                };

                let value = if item.is_condition() {
                    (!latest.is_unavailable()).then_some(CONDITION_UNAVAILABLE)
                } else if item.constraints().is_constrained() {
                    // Constrained items only go UNAVAILABLE when they can
                    // take more than one value.
                    (item.constraints().values.len() > 1
                        && latest.value_string() != UNAVAILABLE)
                        .then_some(UNAVAILABLE)
                } else {
                    (latest.value_string() != UNAVAILABLE).then_some(UNAVAILABLE)
                };

                if let Some(value) = value {
                    self.add_to_buffer(item, value, &time);
                }
            }
        }
    }
}
