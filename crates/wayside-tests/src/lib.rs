// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Wayside Integration Tests
//!
//! Cross-crate tests for the wayside comm node, plus the shared helpers
//! they use.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `mocks`: scripted messengers, codecs and procedures
//!   - `fixtures`: prebuilt controllers, policies and configuration text
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p wayside-tests
//! cargo test -p wayside-tests --test integration_engine
//! cargo test -p wayside-tests --test integration_protocols
//! cargo test -p wayside-tests --test integration_config
//! ```
//!
//! ## Test Categories
//!
//! ### Engine Tests (`integration_engine.rs`)
//! - Failure threshold, poll suppression and interval recovery
//! - Shared modem pool deferral
//! - Retry exhaustion and cleanup
//! - Deduplication, single flight, aging and cancellation
//! - Poll jobs against a full poller
//!
//! ### Protocol Tests (`integration_protocols.rs`)
//! - E6 acknowledge timeout query
//! - Driver poll operations through a live poller
//!
//! ### Config Tests (`integration_config.rs`)
//! - Loading YAML, TOML and JSON files
//! - Environment overrides and validation errors

pub mod common;
