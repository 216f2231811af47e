// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Routing of SHDR frames into the agent.
//!
//! One [`Adapter`] per connection interprets data lines against the device
//! model: `device:key` routing, timestamp extraction, duplicate and
//! minimum-delta/period suppression, multi-line asset assembly, and the `*`
//! protocol commands. Values are handed to the sink as received (trimmed and
//! upcased); reset-trigger stripping and unit conversion happen once, inside
//! observation construction. Suppression state lives here, per connection,
//! and is dropped on disconnect.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mtconnect_core::SourceId;
use mtconnect_core::device_model::DataItem;
use mtconnect_core::device_model::data_item::ConversionState;
use mtconnect_core::device_model::units;

use crate::connector::{FatalCommandError, FrameHandler};
use crate::frame::{
    AdapterCommand, AssetDirective, MULTILINE_MARKER, split_device_key, trim_value,
};
use crate::sink::{AdapterSink, DeviceMetadata};
use crate::timestamp::{TimeMode, TimeTracker};

/// Behavior switches for one adapter, from configuration; some can be
/// flipped at runtime by protocol commands.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(into))]
pub struct AdapterOptions {
    /// The adapter's default device name.
    pub device: String,
    /// Further devices this adapter feeds through `device:key` routing.
    #[builder(default)]
    pub additional_devices: Vec<String>,
    /// Drop values equal to the previous value of the same data item.
    #[builder(default = "false")]
    pub filter_duplicates: bool,
    /// Drive AVAILABILITY from the connection state.
    #[builder(default = "false")]
    pub auto_available: bool,
    /// Replace reported timestamps with the agent clock.
    #[builder(default = "false")]
    pub ignore_timestamps: bool,
    /// Interpret reported timestamps as offsets from a per-connection base.
    #[builder(default = "false")]
    pub relative_time: bool,
    /// Apply native-unit conversion to numeric values.
    #[builder(default = "true")]
    pub conversion_required: bool,
    /// Upcase event values before suppression and storage.
    #[builder(default = "true")]
    pub upcase_values: bool,
    /// The source claims real-time delivery; informational only.
    #[builder(default = "false")]
    pub real_time: bool,
}

#[derive(Debug)]
struct PendingAsset {
    device: String,
    asset_id: String,
    asset_type: String,
    time: String,
    terminator: String,
    body: String,
}

/// Per-data-item suppression state.
#[derive(Debug, Default)]
struct SuppressionState {
    last_value: HashMap<String, String>,
    last_sample: HashMap<String, f64>,
    last_offset: HashMap<String, f64>,
}

impl SuppressionState {
    fn clear(&mut self) {
        self.last_value.clear();
        self.last_sample.clear();
        self.last_offset.clear();
    }
}

/// Routes one adapter connection's frames into an [`AdapterSink`].
pub struct Adapter<S: AdapterSink> {
    sink: Arc<S>,
    source: SourceId,
    options: AdapterOptions,
    device_name: String,
    all_devices: Vec<String>,
    time: TimeTracker,
    suppression: SuppressionState,
    log_once: HashSet<String>,
    pending_asset: Option<PendingAsset>,
}

impl<S: AdapterSink> Adapter<S> {
    /// Create the routing layer for one adapter connection.
    #[must_use]
    pub fn new(sink: Arc<S>, source: SourceId, options: AdapterOptions) -> Self {
        let device_name = options.device.clone();
        let mut all_devices = vec![device_name.clone()];
        all_devices.extend(options.additional_devices.iter().cloned());
        Self {
            sink,
            source,
            options,
            device_name,
            all_devices,
            time: TimeTracker::new(),
            suppression: SuppressionState::default(),
            log_once: HashSet::new(),
            pending_asset: None,
        }
    }

    /// The device this adapter currently feeds by default.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn time_mode(&self) -> TimeMode {
        if self.options.relative_time {
            TimeMode::Relative
        } else if self.options.ignore_timestamps {
            TimeMode::Ignore
        } else {
            TimeMode::Absolute
        }
    }

    fn process_data(&mut self, line: &str) {
        if let Some(pending) = &mut self.pending_asset {
            if line == pending.terminator {
                let pending = self.pending_asset.take().expect("pending asset present");
                self.sink.add_asset(
                    &pending.device,
                    &pending.asset_id,
                    &pending.asset_type,
                    &pending.body,
                    &pending.time,
                );
            } else {
                pending.body.push_str(line);
                pending.body.push('\n');
            }
            return;
        }

        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 2 {
            log::warn!("discarding malformed line '{line}'");
            return;
        }
        let (time, offset) = self.time.extract(fields[0], self.time_mode());

        let key = fields[1];
        let value = fields.get(2).copied().unwrap_or("");

        if key.contains('@') {
            self.process_asset(&fields, &time);
            return;
        }

        if self.process_data_item(line, key, value, &fields, 3, &time, offset, true) {
            // Scalar pairs: keep consuming KEY|VALUE from the rest.
            let mut index = 3;
            while index < fields.len() {
                let key = fields[index];
                let value = fields.get(index + 1).copied().unwrap_or("");
                self.process_data_item(line, key, value, &fields, index + 2, &time, offset, false);
                index += 2;
            }
        }
    }

    /// Handle one KEY|VALUE pair. Returns false when the data item consumed
    /// the rest of the line (conditions, alarms, messages, time series).
    #[allow(clippy::too_many_arguments)]
    fn process_data_item(
        &mut self,
        line: &str,
        input_key: &str,
        input_value: &str,
        fields: &[&str],
        rest_index: usize,
        time: &str,
        offset: Option<f64>,
        first: bool,
    ) -> bool {
        let (device_prefix, key) = split_device_key(input_key);
        let device = match device_prefix {
            Some(device) => device.to_string(),
            None => self.device_name.clone(),
        };

        if !self.sink.device_exists(&device) {
            log::debug!("could not find device: {device}");
            // Keep processing the rest of the pairs.
            return true;
        }

        let Some(data_item) = self.sink.data_item(&device, key) else {
            if self.log_once.contains(key) {
                log::trace!("({device}) could not find data item: {key}");
            } else {
                log::warn!("({device}) could not find data item: {key} from line '{line}'");
                self.log_once.insert(key.to_string());
            }
            return true;
        };

        if data_item.has_constant_value() {
            if !self.log_once.contains(key) {
                log::debug!("({device}) ignoring value for {key}, constant value");
                self.log_once.insert(key.to_string());
            }
            return true;
        }

        let takes_rest = data_item.is_condition()
            || data_item.is_alarm()
            || data_item.is_message()
            || data_item.is_time_series();

        let mut more = true;
        let value = if first && takes_rest {
            more = false;
            let mut value = input_value.to_string();
            for rest in &fields[rest_index.min(fields.len())..] {
                value.push('|');
                value.push_str(rest);
            }
            value
        } else if self.options.upcase_values && !takes_rest {
            input_value.to_ascii_uppercase()
        } else {
            input_value.to_string()
        };

        data_item.set_data_source(self.source);
        if !self.options.conversion_required {
            data_item.set_conversion(ConversionState::NotRequired);
        }

        let value = trim_value(&value).to_string();

        // Reset-trigger suffixes are stripped for suppression comparison.
        let check = match data_item.reset_trigger() {
            Some(_) => value
                .split_once(':')
                .map_or(value.as_str(), |(v, _)| v)
                .to_string(),
            None => value.clone(),
        };

        if self.is_duplicate(&data_item, &check, offset) {
            if self.options.filter_duplicates {
                log::trace!("dropping duplicate value for {key} of {value}");
            }
            return more;
        }

        self.sink.add_observation(&data_item, &value, time);
        more
    }

    /// Duplicate and filter suppression.
    fn is_duplicate(&mut self, data_item: &Arc<DataItem>, value: &str, offset: Option<f64>) -> bool {
        if data_item.is_discrete() {
            return false;
        }
        if data_item.has_filters() {
            // Minimum-delta filters compare in converted value space.
            let number: f64 = value.parse().unwrap_or(0.0);
            let converted = units::convert_f64(data_item, number);
            return self.is_filtered(data_item, converted, offset);
        }
        if !self.options.filter_duplicates {
            return false;
        }
        if data_item.representation()
            != mtconnect_core::device_model::data_item::Representation::Value
        {
            return false;
        }
        let id = data_item.id().to_string();
        match self.suppression.last_value.get(&id) {
            Some(last) if last == value => true,
            _ => {
                self.suppression
                    .last_value
                    .insert(id, value.to_string());
                false
            }
        }
    }

    fn is_filtered(&mut self, data_item: &Arc<DataItem>, value: f64, offset: Option<f64>) -> bool {
        let id = data_item.id().to_string();
        if let Some(delta) = data_item.minimum_delta() {
            if data_item.category() == mtconnect_core::device_model::data_item::Category::Sample {
                if let Some(last) = self.suppression.last_sample.get(&id) {
                    if value > last - delta && value < last + delta {
                        return true;
                    }
                }
                self.suppression.last_sample.insert(id.clone(), value);
            }
        }
        if let Some(period) = data_item.minimum_period() {
            if let (Some(last), Some(offset)) = (self.suppression.last_offset.get(&id), offset) {
                if offset < last + period {
                    return true;
                }
            }
            if let Some(offset) = offset {
                self.suppression.last_offset.insert(id, offset);
            }
        }
        false
    }

    fn process_asset(&mut self, fields: &[&str], time: &str) {
        let (device_prefix, key) = split_device_key(fields[1]);
        let device = match device_prefix {
            Some(device) => device.to_string(),
            None => self.device_name.clone(),
        };
        let Some(directive) = AssetDirective::parse(key) else {
            log::warn!("unknown asset directive '{}', line skipped", fields[1]);
            return;
        };

        let value = trim_value(fields.get(2).copied().unwrap_or(""));
        // A leading '@' shorthand prefixes the id with the device uuid.
        let asset_id = match value.strip_prefix('@') {
            Some(rest) => {
                let uuid = self.sink.device_uuid(&device).unwrap_or_default();
                format!("{uuid}{rest}")
            }
            None => value.to_string(),
        };

        match directive {
            AssetDirective::Upsert => {
                let asset_type = fields.get(3).copied().unwrap_or("");
                let rest = fields[4.min(fields.len())..].join("|");
                if rest.contains(MULTILINE_MARKER) {
                    self.pending_asset = Some(PendingAsset {
                        device,
                        asset_id,
                        asset_type: asset_type.to_string(),
                        time: time.to_string(),
                        terminator: rest.trim().to_string(),
                        body: String::new(),
                    });
                } else {
                    self.sink
                        .add_asset(&device, &asset_id, asset_type, &rest, time);
                }
            }
            AssetDirective::Update => {
                let mut patches = Vec::new();
                let rest = &fields[3.min(fields.len())..];
                if rest.first().is_some_and(|field| field.starts_with('<')) {
                    for fragment in rest {
                        patches.push(("xml".to_string(), (*fragment).to_string()));
                    }
                } else {
                    let mut index = 0;
                    while index + 1 < rest.len() {
                        patches.push((rest[index].to_string(), rest[index + 1].to_string()));
                        index += 2;
                    }
                }
                self.sink.update_asset(&device, &asset_id, &patches, time);
            }
            AssetDirective::Remove => {
                self.sink.remove_asset(&device, &asset_id, time);
            }
            AssetDirective::RemoveAll => {
                // The value field is the asset type here.
                self.sink.remove_all_assets(&device, value, time);
            }
        }
    }

    fn apply_command(&mut self, command: AdapterCommand) -> Result<Option<String>, FatalCommandError> {
        match command {
            AdapterCommand::Probe => {
                let Some(probe) = self.sink.probe_document(&self.device_name) else {
                    log::warn!("cannot build probe document for {}", self.device_name);
                    return Ok(None);
                };
                Ok(Some(format!("* PROBE LENGTH={}\n{probe}", probe.len())))
            }
            AdapterCommand::Uuid(value) => {
                self.sink
                    .update_device_metadata(&self.device_name, DeviceMetadata::Uuid(value));
                Ok(None)
            }
            AdapterCommand::Manufacturer(value) => {
                self.sink
                    .update_device_metadata(&self.device_name, DeviceMetadata::Manufacturer(value));
                Ok(None)
            }
            AdapterCommand::Station(value) => {
                self.sink
                    .update_device_metadata(&self.device_name, DeviceMetadata::Station(value));
                Ok(None)
            }
            AdapterCommand::SerialNumber(value) => {
                self.sink
                    .update_device_metadata(&self.device_name, DeviceMetadata::SerialNumber(value));
                Ok(None)
            }
            AdapterCommand::Description(value) => {
                self.sink
                    .update_device_metadata(&self.device_name, DeviceMetadata::Description(value));
                Ok(None)
            }
            AdapterCommand::NativeName(value) => {
                self.sink
                    .update_device_metadata(&self.device_name, DeviceMetadata::NativeName(value));
                Ok(None)
            }
            AdapterCommand::Calibration(triples) => {
                self.apply_calibration(&triples);
                Ok(None)
            }
            AdapterCommand::ConversionRequired(required) => {
                self.options.conversion_required = required;
                Ok(None)
            }
            AdapterCommand::RelativeTime(relative) => {
                self.options.relative_time = relative;
                Ok(None)
            }
            AdapterCommand::RealTime(real_time) => {
                self.options.real_time = real_time;
                log::debug!("realTime set to {real_time} for {}", self.device_name);
                Ok(None)
            }
            AdapterCommand::Device(name_or_uuid) => match self.sink.resolve_device(&name_or_uuid) {
                Some(canonical) => {
                    log::info!(
                        "device name given by the adapter, {name_or_uuid}, has been assigned to cfg {}",
                        self.device_name
                    );
                    self.device_name = canonical;
                    Ok(None)
                }
                None => Err(FatalCommandError(format!(
                    "cannot find device for device name or uuid: {name_or_uuid}"
                ))),
            },
            AdapterCommand::Pong(_) | AdapterCommand::Ping => Ok(None),
            AdapterCommand::Unknown(line) => {
                log::warn!("unknown command '{line}' for device '{}'", self.device_name);
                Ok(None)
            }
        }
    }

    /// `name|factor|offset` triples from a `* calibration:` command.
    fn apply_calibration(&mut self, triples: &str) {
        let fields: Vec<&str> = triples.split('|').collect();
        for triple in fields.chunks(3) {
            let [name, factor, offset] = triple else {
                break;
            };
            let Some(data_item) = self.sink.data_item(&self.device_name, name) else {
                log::warn!("cannot find data item to calibrate for {name}");
                continue;
            };
            let factor: f64 = factor.trim().parse().unwrap_or(1.0);
            let offset: f64 = offset.trim().parse().unwrap_or(0.0);
            data_item.set_conversion_factor(factor, offset);
        }
    }
}

impl<S: AdapterSink> FrameHandler for Adapter<S> {
    fn connected(&mut self) {
        self.sink
            .adapter_connected(self.source, &self.all_devices, self.options.auto_available);
    }

    fn disconnected(&mut self) {
        // Relative time re-anchors and suppression restarts per connection.
        self.time.reset();
        self.suppression.clear();
        self.pending_asset = None;
        self.sink.adapter_disconnected(
            self.source,
            &self.all_devices,
            self.options.auto_available,
        );
    }

    fn line(&mut self, line: &str) {
        self.process_data(line);
    }

    fn command(&mut self, command: AdapterCommand) -> Result<Option<String>, FatalCommandError> {
        self.apply_command(command)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use mtconnect_core::SourceId;
    use mtconnect_core::device_model::DataItem;
    use mtconnect_core::device_model::data_item::{Category, DataItemBuilder, Representation};

    use super::{Adapter, AdapterOptionsBuilder};
    use crate::connector::FrameHandler;
    use crate::sink::{AdapterSink, DeviceMetadata};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Observation(String, String, String),
        Asset(String, String, String, String),
        UpdateAsset(String, Vec<(String, String)>),
        RemoveAsset(String, String),
        RemoveAll(String, String),
        Metadata(String, DeviceMetadata),
    }

    struct StubSink {
        items: HashMap<String, Arc<DataItem>>,
        calls: Mutex<Vec<Call>>,
    }

    impl StubSink {
        fn new(items: Vec<Arc<DataItem>>) -> Self {
            Self {
                items: items
                    .into_iter()
                    .map(|item| (item.source_or_name().to_string(), item))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn observations(&self) -> Vec<(String, String)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Observation(key, value, _) => Some((key, value)),
                    _ => None,
                })
                .collect()
        }
    }

    impl AdapterSink for StubSink {
        fn device_exists(&self, device: &str) -> bool {
            device == "dev" || device == "other"
        }

        fn device_uuid(&self, _device: &str) -> Option<String> {
            Some("UUID-1".to_string())
        }

        fn resolve_device(&self, name_or_uuid: &str) -> Option<String> {
            (name_or_uuid == "mill-2" || name_or_uuid == "UUID-2").then(|| "mill-2".to_string())
        }

        fn data_item(&self, _device: &str, key: &str) -> Option<Arc<DataItem>> {
            self.items.get(key).cloned()
        }

        fn add_observation(&self, data_item: &Arc<DataItem>, value: &str, time: &str) -> u64 {
            self.calls.lock().unwrap().push(Call::Observation(
                data_item.source_or_name().to_string(),
                value.to_string(),
                time.to_string(),
            ));
            1
        }

        fn add_asset(
            &self,
            _device: &str,
            asset_id: &str,
            asset_type: &str,
            body: &str,
            time: &str,
        ) -> bool {
            self.calls.lock().unwrap().push(Call::Asset(
                asset_id.to_string(),
                asset_type.to_string(),
                body.to_string(),
                time.to_string(),
            ));
            true
        }

        fn update_asset(
            &self,
            _device: &str,
            asset_id: &str,
            patches: &[(String, String)],
            _time: &str,
        ) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(Call::UpdateAsset(asset_id.to_string(), patches.to_vec()));
            true
        }

        fn remove_asset(&self, device: &str, asset_id: &str, _time: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(Call::RemoveAsset(device.to_string(), asset_id.to_string()));
            true
        }

        fn remove_all_assets(&self, device: &str, asset_type: &str, _time: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(Call::RemoveAll(device.to_string(), asset_type.to_string()));
            true
        }

        fn probe_document(&self, _device: &str) -> Option<String> {
            Some("<MTConnectDevices/>".to_string())
        }

        fn update_device_metadata(&self, device: &str, update: DeviceMetadata) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Metadata(device.to_string(), update));
            true
        }

        fn adapter_connected(&self, _source: SourceId, _devices: &[String], _auto: bool) {}

        fn adapter_disconnected(&self, _source: SourceId, _devices: &[String], _auto: bool) {}
    }

    fn item(key: &str, category: Category) -> Arc<DataItem> {
        Arc::new(
            DataItemBuilder::default()
                .id(key)
                .name(key)
                .category(category)
                .type_name(match category {
                    Category::Condition => "TEMPERATURE",
                    Category::Sample => "POSITION",
                    Category::Event => "EXECUTION",
                })
                .component_id("c")
                .device_name("dev")
                .device_uuid("UUID-1")
                .build()
                .unwrap(),
        )
    }

    fn adapter(sink: Arc<StubSink>, dup_check: bool) -> Adapter<StubSink> {
        let options = AdapterOptionsBuilder::default()
            .device("dev")
            .filter_duplicates(dup_check)
            .build()
            .unwrap();
        Adapter::new(sink, SourceId(0), options)
    }

    #[test]
    fn scalar_pairs_route_in_one_line() {
        let sink = Arc::new(StubSink::new(vec![
            item("Xact", Category::Sample),
            item("mode", Category::Event),
        ]));
        let mut adapter = adapter(sink.clone(), false);
        adapter.line("2024-01-01T00:00:00Z|Xact|1.5|mode|auto");

        assert_eq!(
            sink.observations(),
            vec![
                ("Xact".to_string(), "1.5".to_string()),
                // Events are upcased by default.
                ("mode".to_string(), "AUTO".to_string()),
            ]
        );
    }

    #[test]
    fn duplicate_suppression_drops_repeats() {
        let sink = Arc::new(StubSink::new(vec![item("mode", Category::Event)]));
        let mut adapter = adapter(sink.clone(), true);
        adapter.line("T1|mode|A");
        adapter.line("T2|mode|A");
        adapter.line("T3|mode|B");

        let values: Vec<String> = sink.observations().into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn conditions_consume_the_rest_of_the_line() {
        let sink = Arc::new(StubSink::new(vec![item("temp", Category::Condition)]));
        let mut adapter = adapter(sink.clone(), false);
        adapter.line("T|temp|fault|100|1||Overtemp");

        assert_eq!(
            sink.observations(),
            vec![("temp".to_string(), "fault|100|1||Overtemp".to_string())]
        );
    }

    #[test]
    fn condition_dedup_uses_the_full_value() {
        let sink = Arc::new(StubSink::new(vec![item("temp", Category::Condition)]));
        let mut adapter = adapter(sink.clone(), true);
        adapter.line("T|temp|fault|100|1||Overtemp");
        adapter.line("T|temp|fault|100|1||Overtemp");
        adapter.line("T|temp|normal||||");

        assert_eq!(sink.observations().len(), 2);
    }

    #[test]
    fn unknown_keys_log_once_and_continue() {
        let sink = Arc::new(StubSink::new(vec![item("Xact", Category::Sample)]));
        let mut adapter = adapter(sink.clone(), false);
        adapter.line("T|nope|1|Xact|2.0");

        assert_eq!(
            sink.observations(),
            vec![("Xact".to_string(), "2.0".to_string())]
        );
    }

    #[test]
    fn minimum_delta_filters_small_changes() {
        let di = Arc::new(
            DataItemBuilder::default()
                .id("load")
                .name("load")
                .category(Category::Sample)
                .type_name("LOAD")
                .minimum_delta(5.0)
                .component_id("c")
                .device_name("dev")
                .device_uuid("u")
                .build()
                .unwrap(),
        );
        let sink = Arc::new(StubSink::new(vec![di]));
        let mut adapter = adapter(sink.clone(), false);
        adapter.line("T|load|10");
        adapter.line("T|load|12");
        adapter.line("T|load|16");
        adapter.line("T|load|2");

        let values: Vec<String> = sink.observations().into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec!["10", "16", "2"]);
    }

    #[test]
    fn reset_trigger_suffix_is_ignored_for_dedup() {
        let di = Arc::new(
            DataItemBuilder::default()
                .id("count")
                .name("count")
                .category(Category::Event)
                .type_name("PART_COUNT")
                .reset_trigger("DAY")
                .component_id("c")
                .device_name("dev")
                .device_uuid("u")
                .build()
                .unwrap(),
        );
        let sink = Arc::new(StubSink::new(vec![di]));
        let mut adapter = adapter(sink.clone(), true);
        adapter.line("T|count|10");
        adapter.line("T|count|10:DAY");
        adapter.line("T|count|12:DAY");

        // The duplicate check strips the suffix, but the accepted value is
        // handed on intact for observation construction to process.
        let values: Vec<String> = sink.observations().into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec!["10", "12:DAY"]);
    }

    #[test]
    fn discrete_items_are_never_suppressed() {
        let di = Arc::new(
            DataItemBuilder::default()
                .id("msg")
                .name("msg")
                .category(Category::Event)
                .type_name("MESSAGE_DISCRETE")
                .representation(Representation::Discrete)
                .component_id("c")
                .device_name("dev")
                .device_uuid("u")
                .build()
                .unwrap(),
        );
        let sink = Arc::new(StubSink::new(vec![di]));
        let mut adapter = adapter(sink.clone(), true);
        adapter.line("T|msg|HELLO");
        adapter.line("T|msg|HELLO");

        assert_eq!(sink.observations().len(), 2);
    }

    #[test]
    fn device_prefixed_keys_route_to_that_device() {
        let sink = Arc::new(StubSink::new(vec![item("Xact", Category::Sample)]));
        let mut adapter = adapter(sink.clone(), false);
        adapter.line("T|other:Xact|9");

        assert_eq!(
            sink.observations(),
            vec![("Xact".to_string(), "9".to_string())]
        );
    }

    #[test]
    fn single_line_asset_routes_to_the_sink() {
        let sink = Arc::new(StubSink::new(Vec::new()));
        let mut adapter = adapter(sink.clone(), false);
        adapter.line("T|@ASSET@|T1|CuttingTool|<CuttingTool>doc</CuttingTool>");

        assert_eq!(
            sink.calls(),
            vec![Call::Asset(
                "T1".to_string(),
                "CuttingTool".to_string(),
                "<CuttingTool>doc</CuttingTool>".to_string(),
                "T".to_string(),
            )]
        );
    }

    #[test]
    fn multiline_assets_accumulate_until_the_terminator() {
        let sink = Arc::new(StubSink::new(Vec::new()));
        let mut adapter = adapter(sink.clone(), false);
        adapter.line("T|@ASSET@|T1|CuttingTool|--multiline--ABCD");
        adapter.line("<CuttingTool>");
        adapter.line("  <Life>1</Life>");
        adapter.line("</CuttingTool>");
        adapter.line("--multiline--ABCD");

        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        let Call::Asset(id, asset_type, body, _) = &calls[0] else {
            panic!("expected asset call");
        };
        assert_eq!(id, "T1");
        assert_eq!(asset_type, "CuttingTool");
        assert_eq!(body, "<CuttingTool>\n  <Life>1</Life>\n</CuttingTool>\n");
    }

    #[test]
    fn asset_id_shorthand_uses_the_device_uuid() {
        let sink = Arc::new(StubSink::new(Vec::new()));
        let mut adapter = adapter(sink.clone(), false);
        adapter.line("T|@REMOVE_ASSET@|@T7");

        assert_eq!(
            sink.calls(),
            vec![Call::RemoveAsset("dev".to_string(), "UUID-1T7".to_string())]
        );
    }

    #[test]
    fn update_asset_with_pairs_and_fragments() {
        let sink = Arc::new(StubSink::new(Vec::new()));
        let mut adapter = adapter(sink.clone(), false);
        adapter.line("T|@UPDATE_ASSET@|T1|Location|9");
        adapter.line("T|@UPDATE_ASSET@|T1|<Overall>32</Overall>");

        assert_eq!(
            sink.calls(),
            vec![
                Call::UpdateAsset(
                    "T1".to_string(),
                    vec![("Location".to_string(), "9".to_string())]
                ),
                Call::UpdateAsset(
                    "T1".to_string(),
                    vec![("xml".to_string(), "<Overall>32</Overall>".to_string())]
                ),
            ]
        );
    }

    #[test]
    fn remove_all_passes_the_type() {
        let sink = Arc::new(StubSink::new(Vec::new()));
        let mut adapter = adapter(sink.clone(), false);
        adapter.line("T|@REMOVE_ALL_ASSETS@|CuttingTool");

        assert_eq!(
            sink.calls(),
            vec![Call::RemoveAll("dev".to_string(), "CuttingTool".to_string())]
        );
    }

    #[test]
    fn probe_command_builds_a_length_prefixed_response() {
        let sink = Arc::new(StubSink::new(Vec::new()));
        let mut adapter = adapter(sink.clone(), false);
        let response = adapter
            .command(crate::frame::AdapterCommand::Probe)
            .unwrap()
            .unwrap();
        assert_eq!(response, "* PROBE LENGTH=19\n<MTConnectDevices/>");
    }

    #[test]
    fn device_command_reroutes_or_fails_fatally() {
        let sink = Arc::new(StubSink::new(Vec::new()));
        let mut adapter = adapter(sink.clone(), false);
        adapter
            .command(crate::frame::AdapterCommand::Device("mill-2".to_string()))
            .unwrap();
        assert_eq!(adapter.device_name(), "mill-2");

        let result = adapter.command(crate::frame::AdapterCommand::Device("ghost".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn metadata_commands_reach_the_sink() {
        let sink = Arc::new(StubSink::new(Vec::new()));
        let mut adapter = adapter(sink.clone(), false);
        adapter
            .command(crate::frame::AdapterCommand::Uuid("NEW".to_string()))
            .unwrap();
        assert_eq!(
            sink.calls(),
            vec![Call::Metadata(
                "dev".to_string(),
                DeviceMetadata::Uuid("NEW".to_string())
            )]
        );
    }
}
