// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Document printers.
//!
//! The observation engine is serialization-agnostic; these printers render
//! its snapshots into MTConnect response documents. Selection is
//! per-request: JSON when the client asks for it, XML otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;

use mtconnect_core::asset::Asset;
use mtconnect_core::device_model::{Device, DeviceModel};
use mtconnect_core::observation::Observation;

pub mod json;
pub mod xml;

pub use json::JsonPrinter;
pub use xml::XmlPrinter;

/// The protocol version the documents declare.
pub const SCHEMA_VERSION: &str = "1.3";

/// Header fields common to every document.
#[derive(Debug, Clone, Copy)]
pub struct DocumentInfo {
    /// Agent instance id (start time in seconds).
    pub instance_id: u64,
    /// Ring-buffer capacity.
    pub buffer_size: u64,
    /// Oldest retained sequence.
    pub first_sequence: u64,
    /// Next sequence to be assigned.
    pub next_sequence: u64,
    /// Newest assigned sequence.
    pub last_sequence: u64,
    /// Asset store bound.
    pub max_assets: usize,
    /// Assets currently stored.
    pub asset_count: usize,
}

/// The enumerated error codes of MTConnect error documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The request itself is not supported.
    Unsupported,
    /// A query parameter failed validation.
    QueryError,
    /// A parameter was outside its documented range.
    OutOfRange,
    /// The named device does not exist.
    NoDevice,
    /// The path expression could not be resolved.
    InvalidXpath,
    /// The parameter combination is invalid.
    InvalidRequest,
    /// The named asset does not exist.
    AssetNotFound,
    /// An unexpected error escaped a handler.
    ServerException,
    /// An internal failure during streaming.
    InternalError,
}

impl ErrorCode {
    /// The wire form of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unsupported => "UNSUPPORTED",
            ErrorCode::QueryError => "QUERY_ERROR",
            ErrorCode::OutOfRange => "OUT_OF_RANGE",
            ErrorCode::NoDevice => "NO_DEVICE",
            ErrorCode::InvalidXpath => "INVALID_XPATH",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::AssetNotFound => "ASSET_NOT_FOUND",
            ErrorCode::ServerException => "SERVER_EXCEPTION",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Renders engine snapshots into response documents.
pub trait Printer: Send + Sync {
    /// The Content-Type of the documents this printer produces.
    fn mime_type(&self) -> &'static str;

    /// The device-model document.
    fn print_probe(
        &self,
        info: &DocumentInfo,
        devices: &[Arc<Device>],
        asset_counts: &BTreeMap<String, usize>,
    ) -> String;

    /// The observation document shared by current and sample responses.
    fn print_streams(
        &self,
        info: &DocumentInfo,
        model: &DeviceModel,
        observations: &[Arc<Observation>],
    ) -> String;

    /// The asset document.
    fn print_assets(&self, info: &DocumentInfo, assets: &[Arc<Asset>]) -> String;

    /// An error document.
    fn print_error(&self, info: &DocumentInfo, code: ErrorCode, message: &str) -> String;
}

/// Element name for a data-item type: `ASSET_CHANGED` becomes
/// `AssetChanged`, with `TimeSeries`/`Discrete` representation suffixes.
/// `PH` is the historical exception.
#[must_use]
pub fn camel_type(observation: &Observation) -> String {
    let data_item = observation.data_item();
    let type_name = data_item.type_name();
    let mut camel = if type_name == "PH" {
        "PH".to_string()
    } else {
        let mut out = String::with_capacity(type_name.len());
        for word in type_name.split('_') {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.extend(chars.map(|c| c.to_ascii_lowercase()));
            }
        }
        out
    };
    match data_item.representation() {
        mtconnect_core::device_model::data_item::Representation::TimeSeries => {
            camel.push_str("TimeSeries");
        }
        mtconnect_core::device_model::data_item::Representation::Discrete => {
            camel.push_str("Discrete");
        }
        mtconnect_core::device_model::data_item::Representation::Value => {}
    }
    camel
}

/// `(componentType, componentName)` of the component owning a data item.
#[must_use]
pub fn component_of(model: &DeviceModel, observation: &Observation) -> (String, Option<String>) {
    let data_item = observation.data_item();
    let mut found = ("Device".to_string(), None);
    if let Some(device) = model.device(data_item.device_name()) {
        device.root().walk(&mut |component| {
            if component.id == data_item.component_id() {
                found = (component.component_type.clone(), component.name.clone());
            }
        });
    }
    found
}

/// Group observations by `(deviceName, componentId)` preserving their order
/// within each group.
#[must_use]
pub fn group_by_component(
    observations: &[Arc<Observation>],
) -> BTreeMap<(String, String), Vec<Arc<Observation>>> {
    let mut groups: BTreeMap<(String, String), Vec<Arc<Observation>>> = BTreeMap::new();
    for observation in observations {
        let key = (
            observation.data_item().device_name().to_string(),
            observation.data_item().component_id().to_string(),
        );
        groups.entry(key).or_default().push(observation.clone());
    }
    groups
}
