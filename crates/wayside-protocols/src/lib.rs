// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # wayside-protocols
//!
//! Field device protocols built on the `wayside-core` property contract.
//!
//! | Module       | Devices                    | Requests            |
//! |--------------|----------------------------|---------------------|
//! | [`e6`]       | RF tag readers             | query, store        |
//! | [`pelcod`]   | PTZ cameras                | store only          |
//! | [`cbw`]      | web relay beacon controllers | query, store      |
//! | [`sierragx`] | cellular modems with GPS   | query               |
//!
//! Each protocol contributes a [`Codec`](wayside_core::Codec), its
//! properties, a few procedures, and a [`ProtocolDriver`] that the runtime
//! looks up in a [`DriverRegistry`] to build poll jobs.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod driver;

pub mod cbw;
pub mod e6;
pub mod pelcod;
pub mod sierragx;

#[cfg(test)]
mod testing;

pub use driver::{DriverError, DriverPollSource, DriverRegistry, ProtocolDriver};

pub use cbw::{CbwCodec, CbwDriver, ChangeBeaconState, QueryBeaconState};
pub use e6::{E6Codec, E6Driver, QueryReaderSettings};
pub use pelcod::{CameraCommand, PelcoDCodec, PelcoDDriver, PelcoDProperty};
pub use sierragx::{QueryGps, SierraGxCodec, SierraGxDriver};
