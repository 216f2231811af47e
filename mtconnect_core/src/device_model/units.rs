// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Native-unit conversion.
//!
//! When a data item's `nativeUnits` differ from its `units`, every numeric
//! value is mapped through `(x + offset) * factor`, with the factor divided
//! by any `nativeScale`. The factor is computed once per data item from a
//! fixed table of simple units composed with `/` and `^` operators; the
//! result is cached on the data item, where a `* calibration:` protocol
//! command can also install factors directly. The `_3D` suffix converts each
//! component of a space-separated triple. `REVOLUTION/MINUTE` is the
//! hard-coded identity.
//!
//! Conversion is applied in exactly one place on the storage path, inside
//! [`Observation::new`](crate::observation::Observation::new), after any
//! reset-trigger substitution. Adapter-side minimum-delta filters call
//! [`convert_f64`] directly so they compare in converted value space.

use super::DataItem;
use super::data_item::ConversionState;
use crate::observation::format_number;

/// Multiplier (and additive offset) taking one simple unit to its MTConnect
/// canonical counterpart.
fn simple_factor(units: &str) -> (f64, f64) {
    match units {
        "INCH" => (25.4, 0.0),
        "FOOT" => (304.8, 0.0),
        "CENTIMETER" => (10.0, 0.0),
        "DECIMETER" => (100.0, 0.0),
        "METER" => (1000.0, 0.0),
        "FAHRENHEIT" => (5.0 / 9.0, -32.0),
        "POUND" => (0.453_592_37, 0.0),
        "GRAM" => (1.0 / 1000.0, 0.0),
        "RADIAN" => (57.295_779_5, 0.0),
        "MINUTE" => (60.0, 0.0),
        "HOUR" => (3600.0, 0.0),
        // Everything else is already in canonical units.
        _ => (1.0, 0.0),
    }
}

/// Compute the conversion for a data item from its unit attributes.
fn determine(data_item: &DataItem) -> ConversionState {
    let units = data_item.units();
    let native = data_item.native_units().or(units);
    let Some(native) = native else {
        // No units at all: nothing to convert, native scale included.
        return ConversionState::NotRequired;
    };

    let mut factor;
    let mut offset = 0.0;
    let mut three_d = false;
    let mut required = true;

    if let Some((numerator, denominator)) = native.split_once('/') {
        if native == "REVOLUTION/MINUTE" {
            factor = 1.0;
            required = false;
        } else if numerator == "REVOLUTION" && denominator == "SECOND" {
            factor = 60.0;
        } else if let Some((unit, power)) = denominator.split_once('^') {
            let (num_factor, num_offset) = simple_factor(numerator);
            let (den_factor, _) = simple_factor(unit);
            let power: f64 = power.parse().unwrap_or(1.0);
            factor = num_factor / den_factor.powf(power);
            offset = num_offset;
        } else {
            let (num_factor, num_offset) = simple_factor(numerator);
            let (den_factor, _) = simple_factor(denominator);
            factor = num_factor / den_factor;
            offset = num_offset;
        }
    } else {
        let base = match native.strip_suffix("_3D") {
            Some(stripped) => {
                three_d = true;
                stripped
            }
            None => native,
        };
        let (simple, simple_offset) = simple_factor(base);
        factor = simple;
        offset = simple_offset;
        if factor == 1.0 {
            if units == Some(base) {
                required = false;
            } else if let Some(kilo_base) = base.strip_prefix("KILO") {
                if units == Some(kilo_base) {
                    factor = 1000.0;
                } else {
                    required = false;
                }
            } else {
                required = false;
            }
        }
    }

    if let Some(scale) = data_item.native_scale() {
        required = true;
        factor /= scale;
    }

    if required {
        ConversionState::Linear {
            factor,
            offset,
            three_d,
        }
    } else {
        ConversionState::NotRequired
    }
}

/// The data item's conversion, computing and caching it on first use.
fn conversion_for(data_item: &DataItem) -> ConversionState {
    match data_item.conversion() {
        ConversionState::Undetermined => {
            let state = determine(data_item);
            data_item.set_conversion(state);
            state
        }
        determined => determined,
    }
}

/// Convert one numeric value.
#[must_use]
pub fn convert_f64(data_item: &DataItem, value: f64) -> f64 {
    match conversion_for(data_item) {
        ConversionState::Linear { factor, offset, .. } => (value + offset) * factor,
        _ => value,
    }
}

/// Convert a value string, handling `_3D` triples. Values that need no
/// conversion pass through untouched.
#[must_use]
pub fn convert_value(data_item: &DataItem, value: &str) -> String {
    match conversion_for(data_item) {
        ConversionState::Linear {
            factor,
            offset,
            three_d,
        } => {
            if three_d {
                let converted: Vec<String> = value
                    .split_ascii_whitespace()
                    .map(|component| {
                        let number: f64 = component.parse().unwrap_or(0.0);
                        format_number((number + offset) * factor)
                    })
                    .collect();
                converted.join(" ")
            } else {
                let number: f64 = value.trim().parse().unwrap_or(0.0);
                format_number((number + offset) * factor)
            }
        }
        _ => value.to_string(),
    }
}
