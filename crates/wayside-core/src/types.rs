// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types shared by every layer of the engine.
//!
//! Identifiers are thin newtypes over `String`. Device state is modelled as
//! an immutable snapshot of named [`Value`]s which is replaced wholesale when
//! an operation completes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[inline]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Identifier of a comm link.
    ///
    /// # Examples
    ///
    /// ```
    /// use wayside_core::types::LinkId;
    ///
    /// let id = LinkId::new("line-7");
    /// assert_eq!(id.as_str(), "line-7");
    /// ```
    LinkId
}

string_id! {
    /// Identifier of a controller on a comm link.
    ControllerId
}

string_id! {
    /// Identifier of a device bound to a controller.
    DeviceId
}

// =============================================================================
// Priority
// =============================================================================

/// Scheduling priority of an operation.
///
/// Ordering follows urgency: `Command > Diagnostic > Poll > Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work that runs only when nothing else is queued.
    Idle,
    /// Periodic polling.
    Poll,
    /// Diagnostic queries and settings reads.
    Diagnostic,
    /// Operator commands.
    Command,
}

impl Priority {
    /// Returns the numeric rank (higher is more urgent).
    #[inline]
    pub fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Poll => 1,
            Self::Diagnostic => 2,
            Self::Command => 3,
        }
    }

    /// Returns `true` for command priority.
    #[inline]
    pub fn is_command(self) -> bool {
        self == Self::Command
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Poll => write!(f, "POLL"),
            Self::Diagnostic => write!(f, "DIAGNOSTIC"),
            Self::Command => write!(f, "COMMAND"),
        }
    }
}

// =============================================================================
// Status and outcome
// =============================================================================

/// Health status of a controller as seen by its poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerStatus {
    /// Last exchange succeeded.
    #[default]
    Ok,
    /// Recent failures, below the failure threshold.
    Timeout,
    /// Failure threshold reached. Only command operations are attempted.
    Failed,
    /// Deconfigured. All operations are cancelled.
    Disabled,
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Failed => write!(f, "FAILED"),
            Self::Disabled => write!(f, "DISABLED"),
        }
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Constructed, not yet started.
    Created,
    /// Phases are executing.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with a failure.
    Failed,
    /// Cancelled by its owner or suppressed.
    Cancelled,
}

impl OperationState {
    /// Returns `true` once the operation can make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Final result of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every phase completed.
    Success,
    /// The operation failed.
    Failed,
    /// The operation was cancelled before completing.
    Cancelled,
}

impl Outcome {
    /// Returns `true` for a successful outcome.
    #[inline]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A decoded field value published as part of a device state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// No value.
    #[default]
    Null,
}

impl Value {
    /// Returns the value as a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the value as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

// =============================================================================
// DeviceState
// =============================================================================

/// An immutable snapshot of a device's decoded state.
///
/// Snapshots are built completely and then swapped in. Readers never observe
/// a partially updated state.
///
/// # Examples
///
/// ```
/// use wayside_core::types::DeviceState;
///
/// let state = DeviceState::new().with("flashing", true);
/// assert_eq!(state.get("flashing").and_then(|v| v.as_bool()), Some(true));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    values: BTreeMap<String, Value>,
    updated_at: DateTime<Utc>,
}

impl DeviceState {
    /// Creates an empty snapshot stamped with the current time.
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Adds a named value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Inserts a named value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Returns a named value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Returns all values.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Returns the time the snapshot was taken.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns `true` if no value is present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Protocol
// =============================================================================

/// Wire protocol spoken on a comm link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// E6 RF tag reader.
    E6,
    /// Pelco D pan/tilt/zoom camera.
    PelcoD,
    /// ControlByWeb relay controller (beacons).
    Cbw,
    /// Sierra Wireless GX cellular modem.
    SierraGx,
}

impl Protocol {
    /// Every supported protocol.
    pub const ALL: [Protocol; 4] = [Self::E6, Self::PelcoD, Self::Cbw, Self::SierraGx];

    /// Returns the configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E6 => "e6",
            Self::PelcoD => "pelcod",
            Self::Cbw => "cbw",
            Self::SierraGx => "sierragx",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown protocol '{}'", s))
    }
}

// =============================================================================
// Tests
// =============================================================================
