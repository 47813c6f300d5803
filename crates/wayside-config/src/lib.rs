// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # wayside-config
//!
//! Configuration for the wayside comm node.
//!
//! ## Features
//!
//! - **Schema**: links, controllers, devices, the modem pool, and logging
//! - **Multi-Format Support**: YAML, TOML, and JSON files
//! - **Environment Overrides**: `WAYSIDE_*` variables and `${VAR:default}` placeholders
//! - **Runtime Builders**: each section builds the core value it describes
//!
//! ## Quick Start
//!
//! ```no_run
//! use wayside_config::load_config;
//!
//! let config = load_config("wayside.yaml").unwrap();
//! for link in config.enabled_links() {
//!     println!("{} -> {}", link.id, link.uri);
//! }
//! ```
//!
//! ## Example
//!
//! ```yaml
//! node:
//!   name: depot-7
//! links:
//!   - id: beacons
//!     protocol: cbw
//!     uri: tcp://10.0.0.5:80
//!     poll: { period_secs: 30, offset_secs: 5 }
//!     controllers:
//!       - id: relay-1
//!         devices:
//!           - { id: b1, kind: beacon, pin: 1, verify_pin: 5 }
//!   - id: cell
//!     protocol: sierragx
//!     uri: modem:5551234
//!     modem: true
//!     controllers:
//!       - id: gx-1
//!         devices:
//!           - id: gps-1
//!             kind: gps
//!             params: { username: user, password: "${GX_PASSWORD}" }
//! modem_pool:
//!   modems:
//!     - { name: m1, port: /dev/ttyUSB0, init_string: "ATZ" }
//! logging:
//!   level: info
//!   format: json
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigFormat, ConfigLoader, ConfigLoaderBuilder, load_config, load_config_str};
pub use schema::{
    ControllerConfig, DeviceConfig, FairnessConfig, FairnessKind, LinkConfig, LogFormat, LogLevel,
    LoggingConfig, ModemConfig, ModemPoolConfig, NodeConfig, PollConfig, WaysideConfig,
};
