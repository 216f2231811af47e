// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The JSON document printer.
//!
//! Mirrors the XML documents structurally: the same header fields, device
//! streams grouped by component, and observation objects keyed by their
//! camel-cased element name.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use mtconnect_core::asset::Asset;
use mtconnect_core::device_model::component::Component;
use mtconnect_core::device_model::{Device, DeviceModel};
use mtconnect_core::observation::{Observation, ObservationValue};

use super::{
    DocumentInfo, ErrorCode, Printer, SCHEMA_VERSION, camel_type, component_of,
    group_by_component,
};

/// Renders MTConnect JSON documents.
#[derive(Debug, Default)]
pub struct JsonPrinter;

impl JsonPrinter {
    /// Create the printer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn header(info: &DocumentInfo, streams: bool) -> Value {
    let mut header = json!({
        "creationTime": mtconnect_shdr::timestamp::now_timestamp(),
        "sender": "mtconnect-agent",
        "instanceId": info.instance_id,
        "version": SCHEMA_VERSION,
        "bufferSize": info.buffer_size,
        "assetBufferSize": info.max_assets,
        "assetCount": info.asset_count,
    });
    if streams {
        let map = header.as_object_mut().expect("header is an object");
        map.insert("nextSequence".to_string(), json!(info.next_sequence));
        map.insert("firstSequence".to_string(), json!(info.first_sequence));
        map.insert("lastSequence".to_string(), json!(info.last_sequence));
    }
    header
}

fn data_item_json(item: &mtconnect_core::device_model::DataItem) -> Value {
    let mut map = Map::new();
    map.insert("id".to_string(), json!(item.id()));
    map.insert("category".to_string(), json!(item.category().as_str()));
    map.insert("type".to_string(), json!(item.type_name()));
    if let Some(name) = item.name() {
        map.insert("name".to_string(), json!(name));
    }
    if let Some(sub_type) = item.sub_type() {
        map.insert("subType".to_string(), json!(sub_type));
    }
    if let Some(units) = item.units() {
        map.insert("units".to_string(), json!(units));
    }
    if let Some(native_units) = item.native_units() {
        map.insert("nativeUnits".to_string(), json!(native_units));
    }
    Value::Object(map)
}

fn component_json(component: &Component) -> Value {
    json!({
        "id": component.id,
        "type": component.component_type,
        "name": component.name,
        "dataItems": component.data_items.iter().map(|i| data_item_json(i)).collect::<Vec<_>>(),
        "components": component.children.iter().map(component_json).collect::<Vec<_>>(),
    })
}

fn observation_json(observation: &Observation) -> Value {
    let item = observation.data_item();
    let mut map = Map::new();
    map.insert("dataItemId".to_string(), json!(item.id()));
    map.insert("timestamp".to_string(), json!(observation.timestamp()));
    map.insert("sequence".to_string(), json!(observation.sequence()));
    if let Some(name) = item.name() {
        map.insert("name".to_string(), json!(name));
    }
    if let Some(duration) = observation.duration() {
        map.insert("duration".to_string(), json!(duration));
    }
    if let Some(reset) = observation.reset_triggered() {
        map.insert("resetTriggered".to_string(), json!(reset));
    }
    match observation.value() {
        ObservationValue::Condition(condition) => {
            map.insert("level".to_string(), json!(condition.level.as_str()));
            map.insert("type".to_string(), json!(item.type_name()));
            if let Some(code) = &condition.native_code {
                map.insert("nativeCode".to_string(), json!(code));
            }
            if let Some(severity) = &condition.native_severity {
                map.insert("nativeSeverity".to_string(), json!(severity));
            }
            if let Some(qualifier) = &condition.qualifier {
                map.insert("qualifier".to_string(), json!(qualifier));
            }
            if let Some(text) = &condition.text {
                map.insert("value".to_string(), json!(text));
            }
        }
        ObservationValue::Sample(number) => {
            map.insert("value".to_string(), json!(number));
        }
        ObservationValue::TimeSeries(ts) => {
            map.insert("sampleCount".to_string(), json!(ts.count));
            if let Some(rate) = ts.rate {
                map.insert("sampleRate".to_string(), json!(rate));
            }
            map.insert("value".to_string(), json!(ts.samples));
        }
        ObservationValue::AssetEvent { asset_type, asset_id } => {
            map.insert("assetType".to_string(), json!(asset_type));
            map.insert("value".to_string(), json!(asset_id));
        }
        _ => {
            map.insert("value".to_string(), json!(observation.value_string()));
        }
    }
    let mut wrapper = Map::new();
    wrapper.insert(camel_type(observation), Value::Object(map));
    Value::Object(wrapper)
}

impl Printer for JsonPrinter {
    fn mime_type(&self) -> &'static str {
        "application/json"
    }

    fn print_probe(
        &self,
        info: &DocumentInfo,
        devices: &[Arc<Device>],
        asset_counts: &BTreeMap<String, usize>,
    ) -> String {
        let devices: Vec<Value> = devices
            .iter()
            .map(|device| {
                let device_info = device.info();
                json!({
                    "id": device.id(),
                    "name": device.name(),
                    "uuid": device.uuid(),
                    "description": {
                        "manufacturer": device_info.manufacturer,
                        "serialNumber": device_info.serial_number,
                        "station": device_info.station,
                        "text": device_info.description,
                    },
                    "dataItems": device.root().data_items.iter().map(|i| data_item_json(i)).collect::<Vec<_>>(),
                    "components": device.root().children.iter().map(component_json).collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({
            "MTConnectDevices": {
                "Header": header(info, false),
                "Devices": devices,
                "AssetCounts": asset_counts,
            }
        })
        .to_string()
    }

    fn print_streams(
        &self,
        info: &DocumentInfo,
        model: &DeviceModel,
        observations: &[Arc<Observation>],
    ) -> String {
        let groups = group_by_component(observations);
        let mut device_streams: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for ((device_name, component_id), group) in &groups {
            let (component_type, component_name) = component_of(model, &group[0]);
            let entries: Vec<Value> = group.iter().map(|o| observation_json(o)).collect();
            device_streams
                .entry(device_name.clone())
                .or_default()
                .push(json!({
                    "component": component_type,
                    "componentId": component_id,
                    "name": component_name,
                    "observations": entries,
                }));
        }
        let streams: Vec<Value> = device_streams
            .into_iter()
            .map(|(device_name, component_streams)| {
                let uuid = model.device(&device_name).map(|device| device.uuid());
                json!({
                    "name": device_name,
                    "uuid": uuid,
                    "componentStreams": component_streams,
                })
            })
            .collect();
        json!({
            "MTConnectStreams": {
                "Header": header(info, true),
                "Streams": streams,
            }
        })
        .to_string()
    }

    fn print_assets(&self, info: &DocumentInfo, assets: &[Arc<Asset>]) -> String {
        let assets: Vec<Value> = assets
            .iter()
            .map(|asset| {
                json!({
                    "assetId": asset.asset_id(),
                    "type": asset.asset_type(),
                    "deviceUuid": asset.device_uuid(),
                    "timestamp": asset.timestamp(),
                    "removed": asset.removed(),
                    "body": asset.body(),
                })
            })
            .collect();
        json!({
            "MTConnectAssets": {
                "Header": header(info, false),
                "Assets": assets,
            }
        })
        .to_string()
    }

    fn print_error(&self, info: &DocumentInfo, code: ErrorCode, message: &str) -> String {
        json!({
            "MTConnectError": {
                "Header": header(info, false),
                "Errors": [{"errorCode": code.as_str(), "text": message}],
            }
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use mtconnect_core::device_model::DeviceModel;
    use mtconnect_core::observation::Observation;
    use serde_json::Value;

    use super::JsonPrinter;
    use crate::model_file;
    use crate::printer::{DocumentInfo, ErrorCode, Printer};

    fn info() -> DocumentInfo {
        DocumentInfo {
            instance_id: 9,
            buffer_size: 256,
            first_sequence: 1,
            next_sequence: 3,
            last_sequence: 2,
            max_assets: 8,
            asset_count: 1,
        }
    }

    #[test]
    fn streams_round_trip_as_json() {
        let model =
            DeviceModel::new(model_file::parse(model_file::test_support::MILL).unwrap()).unwrap();
        let position = model.data_item("x_pos").unwrap().clone();
        let observations = vec![Arc::new(Observation::new(position, 2, "T", "1.5"))];

        let doc = JsonPrinter::new().print_streams(&info(), &model, &observations);
        let parsed: Value = serde_json::from_str(&doc).unwrap();
        let streams = &parsed["MTConnectStreams"];
        assert_eq!(streams["Header"]["nextSequence"], 3);
        let observation =
            &streams["Streams"][0]["componentStreams"][0]["observations"][0]["Position"];
        assert_eq!(observation["value"], 1.5);
        assert_eq!(observation["sequence"], 2);
    }

    #[test]
    fn error_documents_carry_the_code() {
        let doc = JsonPrinter::new().print_error(&info(), ErrorCode::NoDevice, "no such device");
        let parsed: Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(
            parsed["MTConnectError"]["Errors"][0]["errorCode"],
            "NO_DEVICE"
        );
    }

    #[test]
    fn probe_includes_devices() {
        let model =
            DeviceModel::new(model_file::parse(model_file::test_support::MILL).unwrap()).unwrap();
        let doc = JsonPrinter::new().print_probe(&info(), model.devices(), &BTreeMap::new());
        let parsed: Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(parsed["MTConnectDevices"]["Devices"][0]["name"], "mill-1");
    }
}
