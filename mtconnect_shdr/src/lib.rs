// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! SHDR adapter connectivity for an MTConnect agent.
//!
//! Adapters push pipe-delimited lines over persistent TCP connections. The
//! [`connector`] owns the socket: connect loop, `* PING`/`* PONG` heartbeats,
//! legacy idle timeout, and reconnect. The [`adapter`] layer turns lines into
//! agent calls through the [`sink::AdapterSink`] trait: key routing, time
//! handling ([`timestamp`]), duplicate and filter suppression, multi-line
//! asset assembly, and protocol commands ([`frame`]). Unit conversion lives
//! with the data model (`mtconnect_core::device_model::units`) and is
//! applied during observation construction.

#![warn(missing_docs)]

#[macro_use]
extern crate derive_builder;

pub mod adapter;
pub mod connector;
pub mod frame;
pub mod sink;
pub mod timestamp;
