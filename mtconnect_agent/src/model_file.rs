// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Device model loading.
//!
//! The external device-configuration parser is reduced here to a serde
//! schema: a JSON file describing devices, their component trees, and their
//! data items. Loading also performs the agent's model fix-ups: devices
//! missing AVAILABILITY get one synthesized (and their adapters default to
//! auto-available), and model versions 1.2/1.3 and later get ASSET_CHANGED /
//! ASSET_REMOVED synthesized.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use mtconnect_core::device_model::component::Component;
use mtconnect_core::device_model::data_item::{
    Category, Constraints, DataItem, DataItemBuilder, Representation,
};
use mtconnect_core::device_model::{Device, ModelError};

/// Device-model loading errors; all fatal at startup.
#[derive(Debug, Error)]
pub enum ModelFileError {
    /// The file could not be read.
    #[error("cannot read device file {}: {source}", .path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid JSON for this schema.
    #[error("cannot parse device file: {0}")]
    Parse(#[from] serde_json::Error),
    /// A data item carried an unknown category or representation.
    #[error("data item {id}: unknown {field} '{value}'")]
    BadAttribute {
        /// Data item id.
        id: String,
        /// Attribute name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
    /// The assembled model violated an invariant.
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConstraintsDef {
    #[serde(default)]
    minimum: Option<String>,
    #[serde(default)]
    maximum: Option<String>,
    #[serde(default)]
    values: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FiltersDef {
    #[serde(default)]
    minimum_delta: Option<f64>,
    #[serde(default)]
    minimum_period: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DataItemDef {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: Option<String>,
    category: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    sub_type: Option<String>,
    #[serde(default)]
    representation: Option<String>,
    #[serde(default)]
    units: Option<String>,
    #[serde(default)]
    native_units: Option<String>,
    #[serde(default)]
    native_scale: Option<f64>,
    #[serde(default)]
    statistic: Option<String>,
    #[serde(default)]
    sample_rate: Option<String>,
    #[serde(default)]
    constraints: Option<ConstraintsDef>,
    #[serde(default)]
    filters: Option<FiltersDef>,
    #[serde(default)]
    reset_trigger: Option<String>,
    #[serde(default)]
    initial_value: Option<String>,
    #[serde(default)]
    composition_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ComponentDef {
    id: String,
    #[serde(rename = "type")]
    component_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    data_items: Vec<DataItemDef>,
    #[serde(default)]
    components: Vec<ComponentDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DeviceDef {
    id: String,
    name: String,
    uuid: String,
    #[serde(default)]
    data_items: Vec<DataItemDef>,
    #[serde(default)]
    components: Vec<ComponentDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ModelFile {
    #[serde(default = "default_version")]
    version: String,
    devices: Vec<DeviceDef>,
}

fn default_version() -> String {
    "1.3".to_string()
}

/// Load and assemble the device model from a JSON file.
///
/// # Errors
/// Returns a [`ModelFileError`] when the file cannot be read or parsed, or
/// when the assembled model is invalid.
pub fn load(path: &Path) -> Result<Vec<Arc<Device>>, ModelFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| ModelFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text)
}

/// Assemble the device model from JSON text.
///
/// # Errors
/// Returns a [`ModelFileError`] when the text cannot be parsed or the
/// assembled model is invalid.
pub fn parse(text: &str) -> Result<Vec<Arc<Device>>, ModelFileError> {
    let file: ModelFile = serde_json::from_str(text)?;
    let (major, minor) = split_version(&file.version);

    let mut devices = Vec::with_capacity(file.devices.len());
    for def in file.devices {
        let mut root = build_component(
            &def.id,
            "Device",
            Some(&def.name),
            def.data_items,
            def.components,
            &def.name,
            &def.uuid,
        )?;

        let mut availability_added = false;
        if !has_type(&root, "AVAILABILITY") {
            root.data_items.push(synthesized(
                &format!("{}_avail", def.id),
                "AVAILABILITY",
                &def.id,
                &def.name,
                &def.uuid,
            ));
            availability_added = true;
        }
        if !has_type(&root, "ASSET_CHANGED") && (major > 1 || (major == 1 && minor >= 2)) {
            root.data_items.push(synthesized(
                &format!("{}_asset_chg", def.id),
                "ASSET_CHANGED",
                &def.id,
                &def.name,
                &def.uuid,
            ));
        }
        if !has_type(&root, "ASSET_REMOVED") && (major > 1 || (major == 1 && minor >= 3)) {
            root.data_items.push(synthesized(
                &format!("{}_asset_rem", def.id),
                "ASSET_REMOVED",
                &def.id,
                &def.name,
                &def.uuid,
            ));
        }

        let device = Arc::new(Device::new(def.id, def.name, def.uuid, root)?);
        device.set_availability_added(availability_added);
        devices.push(device);
    }
    Ok(devices)
}

fn split_version(version: &str) -> (u32, u32) {
    let mut parts = version.split('.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor)
}

fn has_type(component: &Component, type_name: &str) -> bool {
    let mut found = false;
    component.walk(&mut |node| {
        found = found || node.data_items.iter().any(|di| di.type_name() == type_name);
    });
    found
}

fn synthesized(
    id: &str,
    type_name: &str,
    component_id: &str,
    device_name: &str,
    device_uuid: &str,
) -> Arc<DataItem> {
    Arc::new(
        DataItemBuilder::default()
            .id(id)
            .category(Category::Event)
            .type_name(type_name)
            .component_id(component_id)
            .device_name(device_name)
            .device_uuid(device_uuid)
            .build()
            .expect("synthesized data item is complete"),
    )
}

fn build_component(
    id: &str,
    component_type: &str,
    name: Option<&str>,
    data_items: Vec<DataItemDef>,
    children: Vec<ComponentDef>,
    device_name: &str,
    device_uuid: &str,
) -> Result<Component, ModelFileError> {
    let mut items = Vec::with_capacity(data_items.len());
    for def in data_items {
        items.push(build_data_item(def, id, device_name, device_uuid)?);
    }
    let mut built_children = Vec::with_capacity(children.len());
    for child in children {
        let ComponentDef {
            id,
            component_type,
            name,
            data_items,
            components,
        } = child;
        built_children.push(build_component(
            &id,
            &component_type,
            name.as_deref(),
            data_items,
            components,
            device_name,
            device_uuid,
        )?);
    }
    Ok(Component {
        id: id.to_string(),
        component_type: component_type.to_string(),
        name: name.map(ToString::to_string),
        data_items: items,
        children: built_children,
    })
}

fn build_data_item(
    def: DataItemDef,
    component_id: &str,
    device_name: &str,
    device_uuid: &str,
) -> Result<Arc<DataItem>, ModelFileError> {
    let category =
        Category::parse(&def.category).ok_or_else(|| ModelFileError::BadAttribute {
            id: def.id.clone(),
            field: "category",
            value: def.category.clone(),
        })?;
    let representation = match def.representation.as_deref() {
        None => Representation::Value,
        Some(token) => {
            Representation::parse(token).ok_or_else(|| ModelFileError::BadAttribute {
                id: def.id.clone(),
                field: "representation",
                value: token.to_string(),
            })?
        }
    };

    let mut builder = DataItemBuilder::default()
        .id(def.id)
        .category(category)
        .type_name(def.type_name)
        .representation(representation)
        .component_id(component_id)
        .device_name(device_name)
        .device_uuid(device_uuid);
    if let Some(name) = def.name {
        builder = builder.name(name);
    }
    if let Some(source) = def.source {
        builder = builder.source(source);
    }
    if let Some(sub_type) = def.sub_type {
        builder = builder.sub_type(sub_type);
    }
    if let Some(units) = def.units {
        builder = builder.units(units);
    }
    if let Some(native_units) = def.native_units {
        builder = builder.native_units(native_units);
    }
    if let Some(native_scale) = def.native_scale {
        builder = builder.native_scale(native_scale);
    }
    if let Some(statistic) = def.statistic {
        builder = builder.statistic(statistic);
    }
    if let Some(sample_rate) = def.sample_rate {
        builder = builder.sample_rate(sample_rate);
    }
    if let Some(constraints) = def.constraints {
        builder = builder.constraints(Constraints {
            minimum: constraints.minimum,
            maximum: constraints.maximum,
            values: constraints.values,
        });
    }
    if let Some(filters) = def.filters {
        if let Some(delta) = filters.minimum_delta {
            builder = builder.minimum_delta(delta);
        }
        if let Some(period) = filters.minimum_period {
            builder = builder.minimum_period(period);
        }
    }
    if let Some(reset_trigger) = def.reset_trigger {
        builder = builder.reset_trigger(reset_trigger);
    }
    if let Some(initial_value) = def.initial_value {
        builder = builder.initial_value(initial_value);
    }
    if let Some(composition_id) = def.composition_id {
        builder = builder.composition_id(composition_id);
    }

    Ok(Arc::new(builder.build().expect("all required fields set")))
}


#[cfg(test)]
mod tests {
    use super::{parse, split_version};

    #[test]
    fn loads_the_tree_and_indexes_items() {
        let devices = parse(super::test_support::MILL).unwrap();
        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.name(), "mill-1");
        assert_eq!(device.uuid(), "M1-UUID");
        assert!(device.data_item("Xact").is_some());
        assert!(device.data_item("x_temp").is_some());
        assert!(!device.availability_added());
    }

    #[test]
    fn synthesizes_missing_special_items() {
        let devices = parse(
            r#"{"devices": [{"id": "d1", "name": "m", "uuid": "u",
                "dataItems": [{"id": "e1", "type": "EXECUTION", "category": "EVENT"}]}]}"#,
        )
        .unwrap();
        let device = &devices[0];
        assert!(device.availability_added());
        assert_eq!(device.availability().unwrap().id(), "d1_avail");
        assert_eq!(device.asset_changed().unwrap().id(), "d1_asset_chg");
        assert_eq!(device.asset_removed().unwrap().id(), "d1_asset_rem");
    }

    #[test]
    fn old_model_versions_skip_asset_items() {
        let devices = parse(
            r#"{"version": "1.1", "devices": [{"id": "d1", "name": "m", "uuid": "u"}]}"#,
        )
        .unwrap();
        let device = &devices[0];
        assert!(device.availability().is_some());
        assert!(device.asset_changed().is_none());
        assert!(device.asset_removed().is_none());
    }

    #[test]
    fn bad_category_is_an_error() {
        let result = parse(
            r#"{"devices": [{"id": "d1", "name": "m", "uuid": "u",
                "dataItems": [{"id": "e1", "type": "X", "category": "BOGUS"}]}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn versions_parse_leniently() {
        assert_eq!(split_version("1.3"), (1, 3));
        assert_eq!(split_version("2"), (2, 0));
        assert_eq!(split_version("junk"), (1, 0));
    }
}
