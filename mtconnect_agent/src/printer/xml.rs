// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The XML document printer.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use mtconnect_core::asset::Asset;
use mtconnect_core::device_model::component::Component;
use mtconnect_core::device_model::{Device, DeviceModel};
use mtconnect_core::observation::{Observation, ObservationValue, format_number};

use super::{
    DocumentInfo, ErrorCode, Printer, SCHEMA_VERSION, camel_type, component_of,
    group_by_component,
};

/// Renders MTConnect XML documents.
#[derive(Debug, Default)]
pub struct XmlPrinter;

impl XmlPrinter {
    /// Create the printer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, " {name}=\"{}\"", escape(value));
}

fn header(out: &mut String, info: &DocumentInfo, streams: bool) {
    out.push_str("<Header");
    push_attr(out, "creationTime", &mtconnect_shdr::timestamp::now_timestamp());
    push_attr(out, "sender", "mtconnect-agent");
    push_attr(out, "instanceId", &info.instance_id.to_string());
    push_attr(out, "version", SCHEMA_VERSION);
    push_attr(out, "bufferSize", &info.buffer_size.to_string());
    push_attr(out, "assetBufferSize", &info.max_assets.to_string());
    push_attr(out, "assetCount", &info.asset_count.to_string());
    if streams {
        push_attr(out, "nextSequence", &info.next_sequence.to_string());
        push_attr(out, "firstSequence", &info.first_sequence.to_string());
        push_attr(out, "lastSequence", &info.last_sequence.to_string());
    }
    out.push_str("/>");
}

fn print_data_item(out: &mut String, item: &mtconnect_core::device_model::DataItem) {
    out.push_str("<DataItem");
    push_attr(out, "id", item.id());
    push_attr(out, "category", item.category().as_str());
    push_attr(out, "type", item.type_name());
    if let Some(name) = item.name() {
        push_attr(out, "name", name);
    }
    if let Some(source) = item.source() {
        push_attr(out, "source", source);
    }
    if let Some(sub_type) = item.sub_type() {
        push_attr(out, "subType", sub_type);
    }
    match item.representation() {
        mtconnect_core::device_model::data_item::Representation::TimeSeries => {
            push_attr(out, "representation", "TIME_SERIES");
        }
        mtconnect_core::device_model::data_item::Representation::Discrete => {
            push_attr(out, "representation", "DISCRETE");
        }
        mtconnect_core::device_model::data_item::Representation::Value => {}
    }
    if let Some(units) = item.units() {
        push_attr(out, "units", units);
    }
    if let Some(native_units) = item.native_units() {
        push_attr(out, "nativeUnits", native_units);
    }
    if let Some(scale) = item.native_scale() {
        push_attr(out, "nativeScale", &format_number(scale));
    }
    if let Some(statistic) = item.statistic() {
        push_attr(out, "statistic", statistic);
    }
    if let Some(rate) = item.sample_rate() {
        push_attr(out, "sampleRate", rate);
    }
    if let Some(composition_id) = item.composition_id() {
        push_attr(out, "compositionId", composition_id);
    }

    let constraints = item.constraints();
    if constraints.is_constrained() {
        out.push_str("><Constraints>");
        if let Some(minimum) = &constraints.minimum {
            let _ = write!(out, "<Minimum>{}</Minimum>", escape(minimum));
        }
        if let Some(maximum) = &constraints.maximum {
            let _ = write!(out, "<Maximum>{}</Maximum>", escape(maximum));
        }
        for value in &constraints.values {
            let _ = write!(out, "<Value>{}</Value>", escape(value));
        }
        out.push_str("</Constraints></DataItem>");
    } else {
        out.push_str("/>");
    }
}

fn print_component(out: &mut String, component: &Component) {
    out.push('<');
    out.push_str(&component.component_type);
    push_attr(out, "id", &component.id);
    if let Some(name) = &component.name {
        push_attr(out, "name", name);
    }
    out.push('>');
    if !component.data_items.is_empty() {
        out.push_str("<DataItems>");
        for item in &component.data_items {
            print_data_item(out, item);
        }
        out.push_str("</DataItems>");
    }
    if !component.children.is_empty() {
        out.push_str("<Components>");
        for child in &component.children {
            print_component(out, child);
        }
        out.push_str("</Components>");
    }
    let _ = write!(out, "</{}>", component.component_type);
}

/// The attributes shared by every observation element.
fn observation_attrs(out: &mut String, observation: &Observation) {
    let item = observation.data_item();
    push_attr(out, "dataItemId", item.id());
    push_attr(out, "timestamp", observation.timestamp());
    push_attr(out, "sequence", &observation.sequence().to_string());
    if let Some(name) = item.name() {
        push_attr(out, "name", name);
    }
    if let Some(sub_type) = item.sub_type() {
        push_attr(out, "subType", sub_type);
    }
    if let Some(statistic) = item.statistic() {
        push_attr(out, "statistic", statistic);
    }
    if let Some(duration) = observation.duration() {
        push_attr(out, "duration", duration);
    }
    if let Some(reset) = observation.reset_triggered() {
        push_attr(out, "resetTriggered", reset);
    }
}

fn print_observation(out: &mut String, observation: &Observation) {
    match observation.value() {
        ObservationValue::Condition(condition) => {
            let element = condition.level.as_str();
            out.push('<');
            out.push_str(element);
            observation_attrs(out, observation);
            push_attr(out, "type", observation.data_item().type_name());
            if let Some(code) = &condition.native_code {
                push_attr(out, "nativeCode", code);
            }
            if let Some(severity) = &condition.native_severity {
                push_attr(out, "nativeSeverity", severity);
            }
            if let Some(qualifier) = &condition.qualifier {
                push_attr(out, "qualifier", qualifier);
            }
            match &condition.text {
                Some(text) => {
                    let _ = write!(out, ">{}</{element}>", escape(text));
                }
                None => out.push_str("/>"),
            }
        }
        value => {
            let element = camel_type(observation);
            out.push('<');
            out.push_str(&element);
            observation_attrs(out, observation);
            match value {
                ObservationValue::TimeSeries(ts) => {
                    push_attr(out, "sampleCount", &ts.count.to_string());
                    if let Some(rate) = ts.rate {
                        push_attr(out, "sampleRate", &format_number(rate));
                    }
                }
                ObservationValue::Message { native_code, .. } => {
                    if let Some(code) = native_code {
                        push_attr(out, "nativeCode", code);
                    }
                }
                ObservationValue::Alarm {
                    code,
                    native_code,
                    severity,
                    state,
                    ..
                } => {
                    push_attr(out, "code", code);
                    push_attr(out, "nativeCode", native_code);
                    push_attr(out, "severity", severity);
                    push_attr(out, "state", state);
                }
                ObservationValue::AssetEvent { asset_type, .. } => {
                    push_attr(out, "assetType", asset_type);
                }
                _ => {}
            }
            let text = observation.value_string();
            if text.is_empty() {
                out.push_str("/>");
            } else {
                let _ = write!(out, ">{}</{element}>", escape(&text));
            }
        }
    }
}

impl Printer for XmlPrinter {
    fn mime_type(&self) -> &'static str {
        "text/xml"
    }

    fn print_probe(
        &self,
        info: &DocumentInfo,
        devices: &[Arc<Device>],
        _asset_counts: &BTreeMap<String, usize>,
    ) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        out.push_str("<MTConnectDevices>");
        header(&mut out, info, false);
        out.push_str("<Devices>");
        for device in devices {
            let device_info = device.info();
            out.push_str("<Device");
            push_attr(&mut out, "id", device.id());
            push_attr(&mut out, "name", device.name());
            push_attr(&mut out, "uuid", &device.uuid());
            out.push('>');
            if device_info.manufacturer.is_some()
                || device_info.serial_number.is_some()
                || device_info.station.is_some()
                || device_info.description.is_some()
            {
                out.push_str("<Description");
                if let Some(manufacturer) = &device_info.manufacturer {
                    push_attr(&mut out, "manufacturer", manufacturer);
                }
                if let Some(serial) = &device_info.serial_number {
                    push_attr(&mut out, "serialNumber", serial);
                }
                if let Some(station) = &device_info.station {
                    push_attr(&mut out, "station", station);
                }
                match &device_info.description {
                    Some(text) => {
                        let _ = write!(out, ">{}</Description>", escape(text));
                    }
                    None => out.push_str("/>"),
                }
            }
            // The device's own items and children, inside the Device element.
            let root = device.root();
            if !root.data_items.is_empty() {
                out.push_str("<DataItems>");
                for item in &root.data_items {
                    print_data_item(&mut out, item);
                }
                out.push_str("</DataItems>");
            }
            if !root.children.is_empty() {
                out.push_str("<Components>");
                for child in &root.children {
                    print_component(&mut out, child);
                }
                out.push_str("</Components>");
            }
            out.push_str("</Device>");
        }
        out.push_str("</Devices></MTConnectDevices>");
        out
    }

    fn print_streams(
        &self,
        info: &DocumentInfo,
        model: &DeviceModel,
        observations: &[Arc<Observation>],
    ) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        out.push_str("<MTConnectStreams>");
        header(&mut out, info, true);
        out.push_str("<Streams>");

        let groups = group_by_component(observations);
        let mut current_device: Option<String> = None;
        for ((device_name, component_id), group) in &groups {
            if current_device.as_deref() != Some(device_name.as_str()) {
                if current_device.is_some() {
                    out.push_str("</DeviceStream>");
                }
                out.push_str("<DeviceStream");
                push_attr(&mut out, "name", device_name);
                if let Some(device) = model.device(device_name) {
                    push_attr(&mut out, "uuid", &device.uuid());
                }
                out.push('>');
                current_device = Some(device_name.clone());
            }

            let (component_type, component_name) = component_of(model, &group[0]);
            out.push_str("<ComponentStream");
            push_attr(&mut out, "component", &component_type);
            push_attr(&mut out, "componentId", component_id);
            if let Some(name) = component_name {
                push_attr(&mut out, "name", &name);
            }
            out.push('>');

            let mut samples = String::new();
            let mut events = String::new();
            let mut conditions = String::new();
            for observation in group {
                use mtconnect_core::device_model::data_item::Category;
                let target = match observation.data_item().category() {
                    Category::Sample => &mut samples,
                    Category::Event => &mut events,
                    Category::Condition => &mut conditions,
                };
                print_observation(target, observation);
            }
            if !samples.is_empty() {
                let _ = write!(out, "<Samples>{samples}</Samples>");
            }
            if !events.is_empty() {
                let _ = write!(out, "<Events>{events}</Events>");
            }
            if !conditions.is_empty() {
                let _ = write!(out, "<Condition>{conditions}</Condition>");
            }
            out.push_str("</ComponentStream>");
        }
        if current_device.is_some() {
            out.push_str("</DeviceStream>");
        }
        out.push_str("</Streams></MTConnectStreams>");
        out
    }

    fn print_assets(&self, info: &DocumentInfo, assets: &[Arc<Asset>]) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        out.push_str("<MTConnectAssets>");
        header(&mut out, info, false);
        out.push_str("<Assets>");
        for asset in assets {
            // Bodies are stored as serialized documents; embed them as-is.
            out.push_str(asset.body());
        }
        out.push_str("</Assets></MTConnectAssets>");
        out
    }

    fn print_error(&self, info: &DocumentInfo, code: ErrorCode, message: &str) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        out.push_str("<MTConnectError>");
        header(&mut out, info, false);
        out.push_str("<Errors><Error");
        push_attr(&mut out, "errorCode", code.as_str());
        let _ = write!(out, ">{}</Error></Errors></MTConnectError>", escape(message));
        out
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use mtconnect_core::device_model::DeviceModel;
    use mtconnect_core::observation::Observation;

    use super::{XmlPrinter, escape};
    use crate::model_file;
    use crate::printer::{DocumentInfo, ErrorCode, Printer};

    fn info() -> DocumentInfo {
        DocumentInfo {
            instance_id: 12345,
            buffer_size: 131_072,
            first_sequence: 1,
            next_sequence: 10,
            last_sequence: 9,
            max_assets: 1024,
            asset_count: 0,
        }
    }

    fn model() -> DeviceModel {
        DeviceModel::new(model_file::parse(model_file::test_support::MILL).unwrap()).unwrap()
    }

    #[test]
    fn escaping() {
        assert_eq!(escape("a<b&c>\"d\""), "a&lt;b&amp;c&gt;&quot;d&quot;");
    }

    #[test]
    fn probe_document_contains_the_tree() {
        let model = model();
        let printer = XmlPrinter::new();
        let doc = printer.print_probe(&info(), model.devices(), &BTreeMap::new());
        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains("<MTConnectDevices>"));
        assert!(doc.contains("instanceId=\"12345\""));
        assert!(doc.contains("<Device id=\"d1\" name=\"mill-1\" uuid=\"M1-UUID\">"));
        assert!(doc.contains("<Linear id=\"x\" name=\"X\">"));
        assert!(doc.contains("id=\"x_pos\""));
        assert!(doc.contains("units=\"MILLIMETER\""));
    }

    #[test]
    fn streams_document_groups_by_component() {
        let model = model();
        let position = model.data_item("x_pos").unwrap().clone();
        let execution = model.data_item("exec").unwrap().clone();
        let observations = vec![
            Arc::new(Observation::new(position, 5, "T1", "3.5")),
            Arc::new(Observation::new(execution, 6, "T2", "ACTIVE")),
        ];
        let printer = XmlPrinter::new();
        let doc = printer.print_streams(&info(), &model, &observations);
        assert!(doc.contains("<MTConnectStreams>"));
        assert!(doc.contains("nextSequence=\"10\""));
        assert!(doc.contains("<DeviceStream name=\"mill-1\" uuid=\"M1-UUID\">"));
        assert!(doc.contains("component=\"Linear\""));
        assert!(doc.contains("<Samples><Position"));
        assert!(doc.contains(">3.5</Position>"));
        assert!(doc.contains("<Events><Execution"));
        assert!(doc.contains(">ACTIVE</Execution>"));
    }

    #[test]
    fn condition_elements_are_named_by_level() {
        let model = model();
        let temp = model.data_item("x_temp").unwrap().clone();
        let observations = vec![Arc::new(Observation::new(
            temp,
            7,
            "T",
            "fault|100|1||Overtemp",
        ))];
        let printer = XmlPrinter::new();
        let doc = printer.print_streams(&info(), &model, &observations);
        assert!(doc.contains("<Condition><Fault"));
        assert!(doc.contains("nativeCode=\"100\""));
        assert!(doc.contains("type=\"TEMPERATURE\""));
        assert!(doc.contains(">Overtemp</Fault>"));
    }

    #[test]
    fn error_document_carries_the_code() {
        let printer = XmlPrinter::new();
        let doc = printer.print_error(&info(), ErrorCode::OutOfRange, "'at' must be >= 1");
        assert!(doc.contains("<MTConnectError>"));
        assert!(doc.contains("errorCode=\"OUT_OF_RANGE\""));
        assert!(doc.contains("&apos;at&apos; must be &gt;= 1"));
    }
}
