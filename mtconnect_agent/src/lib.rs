// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The MTConnect agent.
//!
//! Owns the device model, the observation buffer, and the asset store from
//! [`mtconnect_core`]; runs one [`mtconnect_shdr`] connector task per
//! configured adapter; and serves the HTTP protocol surface (probe, current,
//! sample, assets, PUT injection, and the multipart long-poll streamer).

#![warn(missing_docs)]

pub mod agent;
pub mod config;
pub mod http;
pub mod model_file;
pub mod printer;
