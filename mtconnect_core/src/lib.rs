// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory observation engine for an MTConnect agent.
//!
//! This crate holds the pieces that do not touch a socket: the device model
//! ([`device_model`]), immutable [`observation::Observation`]s, the
//! checkpointed ring buffer ([`buffer::ObservationBuffer`]), the per-data-item
//! change notifier ([`observer`]), and the bounded asset store ([`asset`]).
//! Transport (SHDR) and the HTTP surface live in their own crates and consume
//! this one.

#![warn(missing_docs)]

#[macro_use]
extern crate derive_builder;

pub mod asset;
pub mod buffer;
pub mod checkpoint;
pub mod device_model;
pub mod observation;
pub mod observer;

/// The value string used for every data item that has no reported value.
pub const UNAVAILABLE: &str = "UNAVAILABLE";

/// The priming value for condition data items (level only, no code or text).
pub const CONDITION_UNAVAILABLE: &str = "UNAVAILABLE|||";

/// Identifies the adapter (or other source) feeding a data item.
///
/// The agent assigns one per adapter; the disconnect fan-out uses it to find
/// the data items owned by a failed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub usize);
