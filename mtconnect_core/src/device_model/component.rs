// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Components and devices.
//!
//! A [`Device`] is the root of a component tree built once by the external
//! model parser. Device identity fields can be rewritten at runtime by
//! adapter protocol commands (`* uuid:`, `* manufacturer:`, ...), so they sit
//! behind small locks; everything else is immutable after load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::ModelError;
use super::data_item::DataItem;

/// A node in a device's component tree.
#[derive(Debug, Default)]
pub struct Component {
    /// Component id, unique within the device.
    pub id: String,
    /// Element name, e.g. `Axes`, `Linear`, `Controller`.
    pub component_type: String,
    /// Optional component name.
    pub name: Option<String>,
    /// Data items attached directly to this component.
    pub data_items: Vec<Arc<DataItem>>,
    /// Child components.
    pub children: Vec<Component>,
}

impl Component {
    /// Depth-first iteration over this component and its descendants.
    pub fn walk(&self, visit: &mut dyn FnMut(&Component)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// All data items in this subtree.
    #[must_use]
    pub fn all_data_items(&self) -> Vec<Arc<DataItem>> {
        let mut items = Vec::new();
        self.walk(&mut |component| items.extend(component.data_items.iter().cloned()));
        items
    }
}

/// Mutable device identity, settable by adapter protocol commands.
#[derive(Debug, Default, Clone)]
pub struct DeviceInfo {
    /// Manufacturer name.
    pub manufacturer: Option<String>,
    /// Serial number.
    pub serial_number: Option<String>,
    /// Station identifier.
    pub station: Option<String>,
    /// Free-form description text.
    pub description: Option<String>,
    /// Name the source knows the device by.
    pub native_name: Option<String>,
}

/// A device: the root of a component tree plus its data-item lookup maps.
#[derive(Debug)]
pub struct Device {
    id: String,
    name: String,
    uuid: RwLock<String>,
    info: Mutex<DeviceInfo>,
    preserve_uuid: AtomicBool,
    availability_added: AtomicBool,
    root: Component,
    by_id: HashMap<String, Arc<DataItem>>,
    by_name: HashMap<String, Arc<DataItem>>,
    by_source: HashMap<String, Arc<DataItem>>,
    availability_id: Option<String>,
    asset_changed_id: Option<String>,
    asset_removed_id: Option<String>,
}

impl Device {
    /// Build a device from its component tree, indexing every data item in
    /// the subtree by id, name, and source.
    ///
    /// # Errors
    /// Returns [`ModelError::DuplicateDataItemId`] when two data items in the
    /// tree share an id.
    pub fn new(id: String, name: String, uuid: String, root: Component) -> Result<Self, ModelError> {
        let mut by_id = HashMap::new();
        let mut by_name = HashMap::new();
        let mut by_source = HashMap::new();
        let mut availability_id = None;
        let mut asset_changed_id = None;
        let mut asset_removed_id = None;

        for item in root.all_data_items() {
            if by_id.contains_key(item.id()) {
                return Err(ModelError::DuplicateDataItemId {
                    id: item.id().to_string(),
                    device: name.clone(),
                });
            }
            match item.type_name() {
                "AVAILABILITY" => availability_id = Some(item.id().to_string()),
                "ASSET_CHANGED" => asset_changed_id = Some(item.id().to_string()),
                "ASSET_REMOVED" => asset_removed_id = Some(item.id().to_string()),
                _ => {}
            }
            if let Some(source) = item.source() {
                by_source.insert(source.to_string(), item.clone());
            }
            if let Some(item_name) = item.name() {
                by_name.insert(item_name.to_string(), item.clone());
            }
            by_id.insert(item.id().to_string(), item);
        }

        Ok(Self {
            id,
            name,
            uuid: RwLock::new(uuid),
            info: Mutex::new(DeviceInfo::default()),
            preserve_uuid: AtomicBool::new(false),
            availability_added: AtomicBool::new(false),
            root,
            by_id,
            by_name,
            by_source,
            availability_id,
            asset_changed_id,
            asset_removed_id,
        })
    }

    /// Device id from the model.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Device name; the primary lookup key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current uuid.
    ///
    /// # Panics
    /// Panics if the uuid lock is poisoned.
    #[must_use]
    pub fn uuid(&self) -> String {
        self.uuid.read().unwrap().clone()
    }

    /// Replace the uuid (the `* uuid:` command). Callers check
    /// [`preserve_uuid`](Self::preserve_uuid) first.
    ///
    /// # Panics
    /// Panics if the uuid lock is poisoned.
    pub fn set_uuid(&self, uuid: String) {
        *self.uuid.write().unwrap() = uuid;
    }

    /// True when configuration pinned the uuid against adapter rewrites.
    #[must_use]
    pub fn preserve_uuid(&self) -> bool {
        self.preserve_uuid.load(Ordering::Relaxed)
    }

    /// Pin or unpin the uuid.
    pub fn set_preserve_uuid(&self, preserve: bool) {
        self.preserve_uuid.store(preserve, Ordering::Relaxed);
    }

    /// True when the agent synthesized the AVAILABILITY data item because the
    /// model lacked one; adapters for such devices default to auto-available.
    #[must_use]
    pub fn availability_added(&self) -> bool {
        self.availability_added.load(Ordering::Relaxed)
    }

    /// Record that AVAILABILITY was synthesized.
    pub fn set_availability_added(&self, added: bool) {
        self.availability_added.store(added, Ordering::Relaxed);
    }

    /// Snapshot of the mutable identity fields.
    ///
    /// # Panics
    /// Panics if the info lock is poisoned.
    #[must_use]
    pub fn info(&self) -> DeviceInfo {
        self.info.lock().unwrap().clone()
    }

    /// Update one mutable identity field.
    ///
    /// # Panics
    /// Panics if the info lock is poisoned.
    pub fn update_info(&self, update: impl FnOnce(&mut DeviceInfo)) {
        update(&mut self.info.lock().unwrap());
    }

    /// The component tree root.
    #[must_use]
    pub fn root(&self) -> &Component {
        &self.root
    }

    /// Look up a data item by adapter key: source alias first, then name,
    /// then id.
    #[must_use]
    pub fn data_item(&self, key: &str) -> Option<&Arc<DataItem>> {
        self.by_source
            .get(key)
            .or_else(|| self.by_name.get(key))
            .or_else(|| self.by_id.get(key))
    }

    /// Every data item of the device.
    pub fn data_items(&self) -> impl Iterator<Item = &Arc<DataItem>> {
        self.by_id.values()
    }

    /// The AVAILABILITY data item.
    #[must_use]
    pub fn availability(&self) -> Option<&Arc<DataItem>> {
        self.availability_id.as_ref().and_then(|id| self.by_id.get(id))
    }

    /// The ASSET_CHANGED data item.
    #[must_use]
    pub fn asset_changed(&self) -> Option<&Arc<DataItem>> {
        self.asset_changed_id
            .as_ref()
            .and_then(|id| self.by_id.get(id))
    }

    /// The ASSET_REMOVED data item.
    #[must_use]
    pub fn asset_removed(&self) -> Option<&Arc<DataItem>> {
        self.asset_removed_id
            .as_ref()
            .and_then(|id| self.by_id.get(id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Component, Device};
    use crate::device_model::data_item::test_support::{sample, with_type};
    use crate::device_model::data_item::{Category, DataItemBuilder};

    fn device_with_items() -> Device {
        let axis = Component {
            id: "x".to_string(),
            component_type: "Linear".to_string(),
            name: Some("X".to_string()),
            data_items: vec![Arc::new(sample("x_pos"))],
            children: Vec::new(),
        };
        let root = Component {
            id: "dev".to_string(),
            component_type: "Device".to_string(),
            name: Some("mill-1".to_string()),
            data_items: vec![
                Arc::new(with_type("avail", "AVAILABILITY")),
                Arc::new(
                    DataItemBuilder::default()
                        .id("exec")
                        .name("execution")
                        .source("exec_src")
                        .category(Category::Event)
                        .type_name("EXECUTION")
                        .component_id("dev")
                        .device_name("mill-1")
                        .device_uuid("u-1")
                        .build()
                        .unwrap(),
                ),
            ],
            children: vec![axis],
        };
        Device::new(
            "dev".to_string(),
            "mill-1".to_string(),
            "u-1".to_string(),
            root,
        )
        .unwrap()
    }

    #[test]
    fn lookup_prefers_source_then_name_then_id() {
        let device = device_with_items();
        assert_eq!(device.data_item("exec_src").unwrap().id(), "exec");
        assert_eq!(device.data_item("execution").unwrap().id(), "exec");
        assert_eq!(device.data_item("exec").unwrap().id(), "exec");
        assert_eq!(device.data_item("x_pos").unwrap().id(), "x_pos");
        assert!(device.data_item("missing").is_none());
    }

    #[test]
    fn special_items_are_discovered() {
        let device = device_with_items();
        assert_eq!(device.availability().unwrap().id(), "avail");
        assert!(device.asset_changed().is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let root = Component {
            id: "dev".to_string(),
            component_type: "Device".to_string(),
            name: None,
            data_items: vec![Arc::new(sample("dup")), Arc::new(sample("dup"))],
            children: Vec::new(),
        };
        let result = Device::new("dev".to_string(), "d".to_string(), "u".to_string(), root);
        assert!(result.is_err());
    }

    #[test]
    fn uuid_and_info_are_mutable() {
        let device = device_with_items();
        device.set_uuid("u-2".to_string());
        assert_eq!(device.uuid(), "u-2");
        device.update_info(|info| info.manufacturer = Some("Acme".to_string()));
        assert_eq!(device.info().manufacturer.as_deref(), Some("Acme"));
    }
}
