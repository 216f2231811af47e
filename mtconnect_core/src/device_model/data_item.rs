// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Data item descriptors.
//!
//! A [`DataItem`] is immutable after model load except for three narrow bits
//! of runtime state: the lazily determined unit conversion, the adapter
//! currently feeding it, and its change-observer list.

use std::sync::Mutex;

use crate::SourceId;
use crate::observer::{ChangeObserver, ChangeSignaler};

/// MTConnect data item category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Continuous numeric measurement.
    Sample,
    /// Discrete state or message.
    Event,
    /// Active alarm state, chained by native code.
    Condition,
}

impl Category {
    /// Parse the model-file form (`SAMPLE`, `EVENT`, `CONDITION`).
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "SAMPLE" => Some(Category::Sample),
            "EVENT" => Some(Category::Event),
            "CONDITION" => Some(Category::Condition),
            _ => None,
        }
    }

    /// The model-file form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Sample => "SAMPLE",
            Category::Event => "EVENT",
            Category::Condition => "CONDITION",
        }
    }
}

/// How values of a data item are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Representation {
    /// A single value per observation.
    #[default]
    Value,
    /// A waveform of samples per observation.
    TimeSeries,
    /// Discrete events; duplicate suppression never applies.
    Discrete,
}

impl Representation {
    /// Parse the model-file form; an absent attribute means `Value`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "VALUE" => Some(Representation::Value),
            "TIME_SERIES" => Some(Representation::TimeSeries),
            "DISCRETE" => Some(Representation::Discrete),
            _ => None,
        }
    }
}

/// Value constraints from the device model. A single enumerated value makes
/// the data item constant: adapter input for it is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    /// Inclusive minimum, as written in the model.
    pub minimum: Option<String>,
    /// Inclusive maximum, as written in the model.
    pub maximum: Option<String>,
    /// Enumerated legal values.
    pub values: Vec<String>,
}

impl Constraints {
    /// True when any constraint is present.
    #[must_use]
    pub fn is_constrained(&self) -> bool {
        self.minimum.is_some() || self.maximum.is_some() || !self.values.is_empty()
    }
}

/// Unit-conversion state of a data item.
///
/// Conversion factors are computed once, on the first numeric value, from the
/// native-units expression; a `* calibration:` protocol command can install
/// them directly.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ConversionState {
    /// Not yet determined; compute from units on first use.
    #[default]
    Undetermined,
    /// Values pass through unchanged.
    NotRequired,
    /// Apply `(x + offset) * factor`, per vector component when `three_d`.
    Linear {
        /// Multiplicative factor (includes any native-scale division).
        factor: f64,
        /// Additive offset applied before the factor.
        offset: f64,
        /// Convert each component of a space-separated triple.
        three_d: bool,
    },
}

/// A typed, uniquely identified observable attached to a device component.
#[derive(Debug, Builder)]
#[builder(pattern = "owned", setter(into))]
pub struct DataItem {
    /// Opaque id, unique process-wide.
    id: String,
    /// Optional name, also usable as an adapter key.
    #[builder(default, setter(strip_option))]
    name: Option<String>,
    /// Optional source alias, the preferred adapter key.
    #[builder(default, setter(strip_option))]
    source: Option<String>,
    /// Category.
    category: Category,
    /// MTConnect type, e.g. `POSITION` or `AVAILABILITY`.
    type_name: String,
    /// Optional sub-type, e.g. `ACTUAL`.
    #[builder(default, setter(strip_option))]
    sub_type: Option<String>,
    /// Representation; defaults to a single value.
    #[builder(default)]
    representation: Representation,
    /// Units after conversion, e.g. `MILLIMETER`.
    #[builder(default, setter(strip_option))]
    units: Option<String>,
    /// Units as reported by the source, e.g. `INCH`.
    #[builder(default, setter(strip_option))]
    native_units: Option<String>,
    /// Scale divisor applied after unit conversion.
    #[builder(default, setter(strip_option))]
    native_scale: Option<f64>,
    /// Statistic attribute, reported verbatim in documents.
    #[builder(default, setter(strip_option))]
    statistic: Option<String>,
    /// Sample rate attribute, reported verbatim in documents.
    #[builder(default, setter(strip_option))]
    sample_rate: Option<String>,
    /// Value constraints.
    #[builder(default)]
    constraints: Constraints,
    /// Minimum-delta filter: drop samples closer than this to the last one.
    #[builder(default, setter(strip_option))]
    minimum_delta: Option<f64>,
    /// Minimum-period filter in seconds.
    #[builder(default, setter(strip_option))]
    minimum_period: Option<f64>,
    /// Reset trigger name; values may carry a `:trigger` suffix.
    #[builder(default, setter(strip_option))]
    reset_trigger: Option<String>,
    /// Value recorded when a reset trigger fires.
    #[builder(default, setter(strip_option))]
    initial_value: Option<String>,
    /// Composition element this item belongs to.
    #[builder(default, setter(strip_option))]
    composition_id: Option<String>,
    /// Owning component id.
    component_id: String,
    /// Owning device name.
    device_name: String,
    /// Owning device uuid at model load.
    device_uuid: String,
    #[builder(setter(skip), default)]
    conversion: Mutex<ConversionState>,
    #[builder(setter(skip), default)]
    data_source: Mutex<Option<SourceId>>,
    #[builder(setter(skip), default)]
    signaler: ChangeSignaler,
}

impl DataItem {
    /// The unique id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The optional name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The optional source alias.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// The key the adapter feed uses: source, then name, then id.
    #[must_use]
    pub fn source_or_name(&self) -> &str {
        self.source
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }

    /// The category.
    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// The MTConnect type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The optional sub-type.
    #[must_use]
    pub fn sub_type(&self) -> Option<&str> {
        self.sub_type.as_deref()
    }

    /// The representation.
    #[must_use]
    pub fn representation(&self) -> Representation {
        self.representation
    }

    /// Units after conversion.
    #[must_use]
    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    /// Units as reported by the source.
    #[must_use]
    pub fn native_units(&self) -> Option<&str> {
        self.native_units.as_deref()
    }

    /// Scale divisor applied after unit conversion.
    #[must_use]
    pub fn native_scale(&self) -> Option<f64> {
        self.native_scale
    }

    /// Statistic attribute.
    #[must_use]
    pub fn statistic(&self) -> Option<&str> {
        self.statistic.as_deref()
    }

    /// Sample rate attribute.
    #[must_use]
    pub fn sample_rate(&self) -> Option<&str> {
        self.sample_rate.as_deref()
    }

    /// Value constraints.
    #[must_use]
    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Minimum-delta filter value.
    #[must_use]
    pub fn minimum_delta(&self) -> Option<f64> {
        self.minimum_delta
    }

    /// Minimum-period filter in seconds.
    #[must_use]
    pub fn minimum_period(&self) -> Option<f64> {
        self.minimum_period
    }

    /// Reset trigger name.
    #[must_use]
    pub fn reset_trigger(&self) -> Option<&str> {
        self.reset_trigger.as_deref()
    }

    /// Value recorded when a reset trigger fires.
    #[must_use]
    pub fn initial_value(&self) -> Option<&str> {
        self.initial_value.as_deref()
    }

    /// Composition element id.
    #[must_use]
    pub fn composition_id(&self) -> Option<&str> {
        self.composition_id.as_deref()
    }

    /// Owning component id.
    #[must_use]
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Owning device name.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Owning device uuid at model load.
    #[must_use]
    pub fn device_uuid(&self) -> &str {
        &self.device_uuid
    }

    /// True for CONDITION items.
    #[must_use]
    pub fn is_condition(&self) -> bool {
        self.category == Category::Condition
    }

    /// True for the legacy ALARM event type.
    #[must_use]
    pub fn is_alarm(&self) -> bool {
        self.type_name == "ALARM"
    }

    /// True for the legacy MESSAGE event type.
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.type_name == "MESSAGE"
    }

    /// True for the ASSET_CHANGED event.
    #[must_use]
    pub fn is_asset_changed(&self) -> bool {
        self.type_name == "ASSET_CHANGED"
    }

    /// True for the ASSET_REMOVED event.
    #[must_use]
    pub fn is_asset_removed(&self) -> bool {
        self.type_name == "ASSET_REMOVED"
    }

    /// True for TIME_SERIES representation.
    #[must_use]
    pub fn is_time_series(&self) -> bool {
        self.representation == Representation::TimeSeries
    }

    /// True for DISCRETE representation.
    #[must_use]
    pub fn is_discrete(&self) -> bool {
        self.representation == Representation::Discrete
    }

    /// Exactly one enumerated constraint value makes the item constant.
    #[must_use]
    pub fn has_constant_value(&self) -> bool {
        self.constraints.values.len() == 1
    }

    /// The constant value, when the item has one.
    #[must_use]
    pub fn constant_value(&self) -> Option<&str> {
        if self.has_constant_value() {
            self.constraints.values.first().map(String::as_str)
        } else {
            None
        }
    }

    /// True when a minimum-delta or minimum-period filter is configured.
    #[must_use]
    pub fn has_filters(&self) -> bool {
        self.minimum_delta.is_some() || self.minimum_period.is_some()
    }

    /// Current unit-conversion state.
    ///
    /// # Panics
    /// Panics if the conversion lock is poisoned.
    #[must_use]
    pub fn conversion(&self) -> ConversionState {
        *self.conversion.lock().unwrap()
    }

    /// Store a determined conversion state.
    ///
    /// # Panics
    /// Panics if the conversion lock is poisoned.
    pub fn set_conversion(&self, state: ConversionState) {
        *self.conversion.lock().unwrap() = state;
    }

    /// Install an explicit calibration factor/offset (the `* calibration:`
    /// protocol command). Identity calibration disables conversion.
    pub fn set_conversion_factor(&self, factor: f64, offset: f64) {
        if factor == 1.0 && offset == 0.0 {
            self.set_conversion(ConversionState::NotRequired);
        } else {
            self.set_conversion(ConversionState::Linear {
                factor,
                offset,
                three_d: false,
            });
        }
    }

    /// The adapter currently feeding this item.
    ///
    /// # Panics
    /// Panics if the data-source lock is poisoned.
    #[must_use]
    pub fn data_source(&self) -> Option<SourceId> {
        *self.data_source.lock().unwrap()
    }

    /// Record the adapter feeding this item.
    ///
    /// # Panics
    /// Panics if the data-source lock is poisoned.
    pub fn set_data_source(&self, source: SourceId) {
        *self.data_source.lock().unwrap() = Some(source);
    }

    /// Subscribe an observer to appends of this item. Idempotent.
    pub fn add_observer(&self, observer: &ChangeObserver) {
        self.signaler.add_observer(observer);
    }

    /// Unsubscribe an observer.
    pub fn remove_observer(&self, observer: &ChangeObserver) {
        self.signaler.remove_observer(observer);
    }

    /// Wake every subscribed observer with the given sequence.
    pub fn signal_observers(&self, sequence: u64) {
        self.signaler.signal(sequence);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{sample, with_type};
    use super::{Category, ConversionState, DataItemBuilder, Representation};

    #[test]
    fn builder_defaults() {
        let di = sample("d1");
        assert_eq!(di.id(), "d1");
        assert_eq!(di.category(), Category::Sample);
        assert_eq!(di.representation(), Representation::Value);
        assert!(!di.has_filters());
        assert_eq!(di.conversion(), ConversionState::Undetermined);
        assert_eq!(di.data_source(), None);
    }

    #[test]
    fn source_or_name_precedence() {
        let di = DataItemBuilder::default()
            .id("d1")
            .name("Xpos")
            .source("srcX")
            .category(Category::Sample)
            .type_name("POSITION")
            .component_id("c")
            .device_name("dev")
            .device_uuid("u")
            .build()
            .unwrap();
        assert_eq!(di.source_or_name(), "srcX");

        let di = DataItemBuilder::default()
            .id("d1")
            .name("Xpos")
            .category(Category::Sample)
            .type_name("POSITION")
            .component_id("c")
            .device_name("dev")
            .device_uuid("u")
            .build()
            .unwrap();
        assert_eq!(di.source_or_name(), "Xpos");
        assert_eq!(sample("d2").source_or_name(), "d2");
    }

    #[test]
    fn constant_value_requires_exactly_one_constraint() {
        let mut di = DataItemBuilder::default()
            .id("d1")
            .category(Category::Event)
            .type_name("ROTARY_MODE")
            .component_id("c")
            .device_name("dev")
            .device_uuid("u")
            .constraints(super::Constraints {
                values: vec!["SPINDLE".to_string()],
                ..Default::default()
            })
            .build()
            .unwrap();
        assert_eq!(di.constant_value(), Some("SPINDLE"));

        di = DataItemBuilder::default()
            .id("d2")
            .category(Category::Event)
            .type_name("ROTARY_MODE")
            .component_id("c")
            .device_name("dev")
            .device_uuid("u")
            .constraints(super::Constraints {
                values: vec!["SPINDLE".to_string(), "INDEX".to_string()],
                ..Default::default()
            })
            .build()
            .unwrap();
        assert_eq!(di.constant_value(), None);
    }

    #[test]
    fn identity_calibration_disables_conversion() {
        let di = sample("d1");
        di.set_conversion_factor(1.0, 0.0);
        assert_eq!(di.conversion(), ConversionState::NotRequired);
        di.set_conversion_factor(2.0, 1.0);
        assert_eq!(
            di.conversion(),
            ConversionState::Linear {
                factor: 2.0,
                offset: 1.0,
                three_d: false
            }
        );
    }

    #[test]
    fn asset_event_types() {
        assert!(with_type("a", "ASSET_CHANGED").is_asset_changed());
        assert!(with_type("a", "ASSET_REMOVED").is_asset_removed());
        assert!(with_type("a", "ALARM").is_alarm());
        assert!(with_type("a", "MESSAGE").is_message());
    }
}
