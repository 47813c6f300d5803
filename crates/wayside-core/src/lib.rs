// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # wayside-core
//!
//! Operation scheduling engine for roadside device communication.
//!
//! This crate provides the transport-independent core shared by every
//! protocol and transport crate:
//!
//! - **Types**: identifiers, priorities, controller status, device state
//! - **Error**: the `CommError` taxonomy that drives retry decisions
//! - **Messenger**: the duplex byte-stream contract of a comm link
//! - **Property**: per-protocol codecs and all-or-nothing `CommMessage`s
//! - **Operation**: the generic phase-driven operation engine
//! - **Poller**: one worker per link with a priority queue
//! - **Scheduler**: cadence-aligned periodic jobs
//! - **Manager**: link registry and routing
//! - **Hooks**: completion events for observers
//!
//! ## Example
//!
//! ```rust,ignore
//! use wayside_core::{EventDispatcher, LinkManager, PollerConfig};
//!
//! let events = Arc::new(EventDispatcher::new());
//! let manager = LinkManager::new(events);
//! let handle = manager.add_link(PollerConfig::new("line-1"), messenger, controllers)?;
//! handle.try_enqueue(Operation::new(procedure, codec, controller).boxed())?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod types;
pub mod controller;
pub mod retry;

// =============================================================================
// Protocol Contract Modules
// =============================================================================

pub mod messenger;
pub mod property;
pub mod phase;
pub mod operation;

// =============================================================================
// Runtime Modules
// =============================================================================

pub mod queue;
pub mod poller;
pub mod scheduler;
pub mod manager;
pub mod hooks;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use error::*;
pub use types::*;

pub use controller::{Admission, Controller, ControllerSnapshot, Device, StatusChange};
pub use hooks::{CollectorHandler, EventDispatcher, EventHandler, OperationEvent, TracingHandler, TracingLevel};
pub use manager::{LinkError, LinkInfo, LinkManager};
pub use messenger::{Messenger, TransportState};
pub use operation::{
    CancelToken, CleanupContext, CompletionReport, Executable, OpIdentity, Operation,
    OperationPolicy, Procedure, StepOutcome,
};
pub use phase::{Deadline, Transition};
pub use poller::{Poller, PollerConfig, PollerHandle, PollerStatsSnapshot};
pub use property::{Codec, CommMessage, MessageContext, Property, RequestKind};
pub use queue::{FairnessPolicy, OperationQueue};
pub use retry::{ExponentialBackoff, FixedDelay, NoRetry, RetryConfig, RetryDecision, RetryStrategy};
pub use scheduler::{Cadence, Job, JobReport, PollJob, PollSource, Scheduler, SchedulerHandle};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
