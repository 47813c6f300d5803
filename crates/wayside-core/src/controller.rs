// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Controllers and the devices bound to them.
//!
//! A [`Controller`] is one addressable endpoint on a comm link. Its health
//! (status, consecutive failures, last success, last error) is written only by
//! the poller of its link when an operation finishes. Devices hold their
//! latest state as an `Arc<DeviceState>` which is swapped atomically.
//!
//! # Status transitions
//!
//! ```text
//!            success                 failure < threshold
//!   ┌──────────────────┐         ┌──────────────────────┐
//!   ▼                  │         ▼                      │
//!  OK ──failure──▶ TIMEOUT ──failure == threshold──▶ FAILED
//!   ▲                                                   │
//!   └──── command or recovery attempt succeeds ─────────┘
//! ```
//!
//! A failed controller admits commands. With a recovery interval set, it also
//! admits one other operation per interval as a recovery attempt, so a
//! device that comes back by itself is noticed by its regular polls.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::CommError;
use crate::types::{ControllerId, ControllerStatus, DeviceId, DeviceState, LinkId, Priority};

// =============================================================================
// Device
// =============================================================================

/// A logical device (sign, beacon, camera, reader) bound to a controller.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    kind: String,
    pin: Option<u16>,
    verify_pin: Option<u16>,
    params: BTreeMap<String, String>,
    state: RwLock<Arc<DeviceState>>,
}

impl Device {
    /// Creates a device of the given kind.
    pub fn new(id: impl Into<DeviceId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            pin: None,
            verify_pin: None,
            params: BTreeMap::new(),
            state: RwLock::new(Arc::new(DeviceState::new())),
        }
    }

    /// Sets the controller pin driving this device.
    pub fn with_pin(mut self, pin: u16) -> Self {
        self.pin = Some(pin);
        self
    }

    /// Sets the pin of the verify (current sensor) circuit.
    pub fn with_verify_pin(mut self, pin: u16) -> Self {
        self.verify_pin = Some(pin);
        self
    }

    /// Adds a protocol specific parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Returns the device ID.
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Returns the device kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the output pin.
    pub fn pin(&self) -> Option<u16> {
        self.pin
    }

    /// Returns the verify pin.
    pub fn verify_pin(&self) -> Option<u16> {
        self.verify_pin
    }

    /// Returns a protocol specific parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns the current state snapshot.
    pub fn state(&self) -> Arc<DeviceState> {
        self.state.read().clone()
    }

    /// Replaces the state snapshot.
    pub fn replace_state(&self, state: DeviceState) -> Arc<DeviceState> {
        let state = Arc::new(state);
        *self.state.write() = state.clone();
        state
    }
}

// =============================================================================
// ControllerHealth
// =============================================================================

#[derive(Debug, Clone, Default)]
struct ControllerHealth {
    status: ControllerStatus,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_attempt: Option<Instant>,
}

/// Serializable view of a controller's health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    /// Controller ID.
    pub id: ControllerId,
    /// Owning link.
    pub link: LinkId,
    /// Current status.
    pub status: ControllerStatus,
    /// Consecutive failed operations.
    pub consecutive_failures: u32,
    /// Time of the last successful operation.
    pub last_success: Option<DateTime<Utc>>,
    /// Description of the last error.
    pub last_error: Option<String>,
}

/// Whether an operation may run against a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The operation runs normally.
    Admitted,
    /// The controller is failed; the operation runs as its recovery attempt.
    Recovery,
    /// The operation must not run.
    Suppressed,
}

/// A status change produced by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// Status before the update.
    pub from: ControllerStatus,
    /// Status after the update.
    pub to: ControllerStatus,
}

// =============================================================================
// Controller
// =============================================================================

/// An addressable endpoint on a comm link.
#[derive(Debug)]
pub struct Controller {
    id: ControllerId,
    link: LinkId,
    drop_address: u16,
    devices: Vec<Arc<Device>>,
    health: RwLock<ControllerHealth>,
}

impl Controller {
    /// Creates a controller with no devices.
    pub fn new(id: impl Into<ControllerId>, link: impl Into<LinkId>, drop_address: u16) -> Self {
        Self {
            id: id.into(),
            link: link.into(),
            drop_address,
            devices: Vec::new(),
            health: RwLock::new(ControllerHealth::default()),
        }
    }

    /// Binds a device to this controller.
    pub fn with_device(mut self, device: Device) -> Self {
        self.devices.push(Arc::new(device));
        self
    }

    /// Returns the controller ID.
    pub fn id(&self) -> &ControllerId {
        &self.id
    }

    /// Returns the owning link ID.
    pub fn link(&self) -> &LinkId {
        &self.link
    }

    /// Returns the drop (protocol) address.
    pub fn drop_address(&self) -> u16 {
        self.drop_address
    }

    /// Returns the bound devices.
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Finds a bound device by ID.
    pub fn device(&self, id: &DeviceId) -> Option<&Arc<Device>> {
        self.devices.iter().find(|d| d.id() == id)
    }

    /// Returns the current status.
    pub fn status(&self) -> ControllerStatus {
        self.health.read().status
    }

    /// Returns the consecutive failure count.
    pub fn consecutive_failures(&self) -> u32 {
        self.health.read().consecutive_failures
    }

    /// Returns `true` once the controller has been deconfigured.
    pub fn is_disabled(&self) -> bool {
        self.status() == ControllerStatus::Disabled
    }

    /// Enables or disables the controller.
    ///
    /// Disabling cancels queued and running operations at the next phase
    /// boundary. Enabling clears the failure history.
    pub fn set_enabled(&self, enabled: bool) -> Option<StatusChange> {
        let mut health = self.health.write();
        let from = health.status;
        if enabled {
            if from != ControllerStatus::Disabled {
                return None;
            }
            *health = ControllerHealth::default();
        } else {
            health.status = ControllerStatus::Disabled;
        }
        change(from, health.status)
    }

    /// Returns `true` if an operation of the given priority may run without
    /// a recovery attempt.
    pub fn admits(&self, priority: Priority) -> bool {
        match self.status() {
            ControllerStatus::Disabled => false,
            ControllerStatus::Failed => priority.is_command(),
            ControllerStatus::Ok | ControllerStatus::Timeout => true,
        }
    }

    /// Decides whether an operation of the given priority runs now.
    ///
    /// A failed controller admits one non-command operation once
    /// `recovery_interval` has passed since its last attempt. `None` leaves
    /// recovery to commands.
    pub fn admit(&self, priority: Priority, recovery_interval: Option<Duration>) -> Admission {
        let mut health = self.health.write();
        match health.status {
            ControllerStatus::Disabled => Admission::Suppressed,
            ControllerStatus::Ok | ControllerStatus::Timeout => Admission::Admitted,
            ControllerStatus::Failed if priority.is_command() => Admission::Admitted,
            ControllerStatus::Failed => {
                let Some(interval) = recovery_interval else {
                    return Admission::Suppressed;
                };
                let now = Instant::now();
                let due = health
                    .last_attempt
                    .is_none_or(|at| now.saturating_duration_since(at) >= interval);
                if due {
                    health.last_attempt = Some(now);
                    Admission::Recovery
                } else {
                    Admission::Suppressed
                }
            }
        }
    }

    /// Records a successful operation.
    pub fn record_success(&self) -> Option<StatusChange> {
        let mut health = self.health.write();
        if health.status == ControllerStatus::Disabled {
            return None;
        }
        let from = health.status;
        health.status = ControllerStatus::Ok;
        health.consecutive_failures = 0;
        health.last_success = Some(Utc::now());
        health.last_error = None;
        health.last_attempt = None;
        change(from, health.status)
    }

    /// Records a failed operation.
    ///
    /// Controller-reported errors only update the last error: the device
    /// answered, so the link to it is healthy.
    pub fn record_failure(&self, error: &CommError, threshold: u32) -> Option<StatusChange> {
        let mut health = self.health.write();
        health.last_error = Some(error.to_string());
        if health.status == ControllerStatus::Disabled || !error.counts_as_failure() {
            return None;
        }
        let from = health.status;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_attempt = Some(Instant::now());
        health.status = if health.consecutive_failures >= threshold.max(1) {
            ControllerStatus::Failed
        } else {
            ControllerStatus::Timeout
        };
        change(from, health.status)
    }

    /// Returns a serializable snapshot of the controller's health.
    pub fn snapshot(&self) -> ControllerSnapshot {
        let health = self.health.read();
        ControllerSnapshot {
            id: self.id.clone(),
            link: self.link.clone(),
            status: health.status,
            consecutive_failures: health.consecutive_failures,
            last_success: health.last_success,
            last_error: health.last_error.clone(),
        }
    }
}

fn change(from: ControllerStatus, to: ControllerStatus) -> Option<StatusChange> {
    (from != to).then_some(StatusChange { from, to })
}

// =============================================================================
// Tests
// =============================================================================
