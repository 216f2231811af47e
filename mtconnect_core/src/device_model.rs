// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The in-memory device model: devices, components, data items, and the
//! path filter used to select data items for queries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

pub mod component;
pub mod data_item;
pub mod path;
pub mod units;

pub use component::{Component, Device, DeviceInfo};
pub use data_item::DataItem;

/// Errors raised while assembling the device model. All of these are fatal
/// at startup.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Two devices share a uuid.
    #[error("duplicate device uuid: {0}")]
    DuplicateUuid(String),
    /// Two data items share an id.
    #[error("duplicate data item id {id} in device {device}")]
    DuplicateDataItemId {
        /// The offending id.
        id: String,
        /// The device that declared it (second occurrence).
        device: String,
    },
    /// The model contains no devices.
    #[error("device model contains no devices")]
    Empty,
}

/// The process-wide registry of devices and data items.
#[derive(Debug)]
pub struct DeviceModel {
    devices: Vec<Arc<Device>>,
    by_name: HashMap<String, Arc<Device>>,
    data_items: HashMap<String, Arc<DataItem>>,
}

impl DeviceModel {
    /// Index a set of devices.
    ///
    /// # Errors
    /// Returns a [`ModelError`] for an empty model, a duplicate device uuid,
    /// or a data-item id reused across devices.
    pub fn new(devices: Vec<Arc<Device>>) -> Result<Self, ModelError> {
        if devices.is_empty() {
            return Err(ModelError::Empty);
        }

        let mut uuids = HashSet::new();
        let mut by_name = HashMap::new();
        let mut data_items: HashMap<String, Arc<DataItem>> = HashMap::new();

        for device in &devices {
            if !uuids.insert(device.uuid()) {
                return Err(ModelError::DuplicateUuid(device.uuid()));
            }
            by_name.insert(device.name().to_string(), device.clone());
            for item in device.data_items() {
                if data_items.contains_key(item.id()) {
                    return Err(ModelError::DuplicateDataItemId {
                        id: item.id().to_string(),
                        device: device.name().to_string(),
                    });
                }
                data_items.insert(item.id().to_string(), item.clone());
            }
        }

        Ok(Self {
            devices,
            by_name,
            data_items,
        })
    }

    /// All devices, in model order.
    #[must_use]
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// The first device; the default target for PUT requests.
    #[must_use]
    pub fn first_device(&self) -> &Arc<Device> {
        &self.devices[0]
    }

    /// Look up a device by name.
    #[must_use]
    pub fn device(&self, name: &str) -> Option<&Arc<Device>> {
        self.by_name.get(name)
    }

    /// Look up a device by uuid or name, uuid first.
    #[must_use]
    pub fn device_by_uuid_or_name(&self, key: &str) -> Option<&Arc<Device>> {
        self.devices
            .iter()
            .find(|device| device.uuid() == key)
            .or_else(|| self.by_name.get(key))
    }

    /// Look up a data item by its process-wide unique id.
    #[must_use]
    pub fn data_item(&self, id: &str) -> Option<&Arc<DataItem>> {
        self.data_items.get(id)
    }

    /// Every data-item id in the model.
    #[must_use]
    pub fn all_data_item_ids(&self) -> HashSet<String> {
        self.data_items.keys().cloned().collect()
    }
}
