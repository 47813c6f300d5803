// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # wayside-bin
//!
//! The `wayside` binary: argument parsing, logging setup, runtime assembly,
//! and graceful shutdown.
//!
//! ## Architecture
//!
//! ```text
//!          main.rs
//!             │
//!          cli.rs ──► commands ──► runtime ──► LinkManager / Scheduler
//!                        │            │
//!                     logging      shutdown
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the node (default command)
//! wayside -c /etc/wayside/wayside.yaml
//!
//! # Check a configuration file
//! wayside validate --format json
//!
//! # Show version
//! wayside version
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{RuntimeBuilder, RuntimeComponents, WaysideRuntime};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
