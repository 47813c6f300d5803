// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions.
//!
//! # Schema Structure
//!
//! ```text
//! WaysideConfig
//! ├── node: NodeConfig
//! ├── links: Vec<LinkConfig>
//! │   ├── fairness: FairnessConfig
//! │   ├── poll: PollConfig
//! │   ├── retry: RetryConfig
//! │   └── controllers: Vec<ControllerConfig>
//! │       └── devices: Vec<DeviceConfig>
//! ├── modem_pool: ModemPoolConfig
//! └── logging: LoggingConfig
//! ```
//!
//! Besides validation, each section knows how to build the runtime value it
//! describes (`OperationPolicy`, `PollerConfig`, `Controller`, `ModemSpec`).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wayside_comm::{LinkUri, ModemSpec};
use wayside_core::{
    Cadence, Controller, Device, ExponentialBackoff, FairnessPolicy, NoRetry, OperationPolicy,
    PollerConfig, Protocol, RetryConfig, RetryStrategy,
};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// Default read timeout in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;

/// Default TCP connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default per-phase deadline in milliseconds.
pub const DEFAULT_PHASE_TIMEOUT_MS: u64 = 10_000;

/// Default per-operation deadline in milliseconds.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 60_000;

/// Default number of failed operations before a controller is marked FAILED.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default poll period in seconds.
pub const DEFAULT_POLL_PERIOD_SECS: u64 = 30;

/// Default modem dial timeout in milliseconds.
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 60_000;

/// Highest Pelco D drop address.
pub const MAX_PELCOD_DROP: u16 = 254;

fn default_true() -> bool {
    true
}

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaysideConfig {
    /// Node identification.
    #[serde(default)]
    pub node: NodeConfig,

    /// Comm links.
    #[serde(default)]
    pub links: Vec<LinkConfig>,

    /// Shared dial-up modems.
    #[serde(default)]
    pub modem_pool: ModemPoolConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WaysideConfig {
    /// Validates the whole configuration.
    ///
    /// Link, controller, and device IDs must be unique across the file.
    pub fn validate(&self) -> ConfigResult<()> {
        self.node.validate()?;
        self.modem_pool.validate()?;

        let mut link_ids = HashSet::new();
        let mut controller_ids = HashSet::new();
        let mut device_ids = HashSet::new();
        for (i, link) in self.links.iter().enumerate() {
            if !link_ids.insert(link.id.as_str()) {
                return Err(ConfigError::duplicate_id("link", &link.id));
            }
            link.validate(i)?;
            if link.modem && self.modem_pool.modems.is_empty() {
                return Err(ConfigError::validation(
                    format!("links[{}].modem", i),
                    "dial-up link needs at least one modem in modem_pool",
                ));
            }
            for controller in &link.controllers {
                if !controller_ids.insert(controller.id.as_str()) {
                    return Err(ConfigError::duplicate_id("controller", &controller.id));
                }
                for device in &controller.devices {
                    if !device_ids.insert(device.id.as_str()) {
                        return Err(ConfigError::duplicate_id("device", &device.id));
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns a link by ID.
    pub fn get_link(&self, id: &str) -> Option<&LinkConfig> {
        self.links.iter().find(|l| l.id == id)
    }

    /// Returns the enabled links.
    pub fn enabled_links(&self) -> impl Iterator<Item = &LinkConfig> {
        self.links.iter().filter(|l| l.enabled)
    }

    /// Returns the number of configured controllers.
    pub fn controller_count(&self) -> usize {
        self.links.iter().map(|l| l.controllers.len()).sum()
    }
}

// =============================================================================
// Node Configuration
// =============================================================================

/// Node identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Node name used in logs.
    #[serde(default = "default_node_name")]
    pub name: String,
}

fn default_node_name() -> String {
    "wayside".to_string()
}

impl NodeConfig {
    /// Validates the node configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation("node.name", "cannot be empty"));
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
        }
    }
}

// =============================================================================
// Link Configuration
// =============================================================================

/// One comm link and the controllers behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    /// Unique link identifier.
    pub id: String,

    /// Protocol spoken on the link.
    pub protocol: Protocol,

    /// Transport URI (`tcp://`, `serial://`, or `modem:`).
    pub uri: String,

    /// Whether the link is started.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether the link dials through the modem pool.
    #[serde(default)]
    pub modem: bool,

    /// Per-read timeout in milliseconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Retry budget shorthand. Overrides `retry.max_retries` when set.
    #[serde(default)]
    pub retries: Option<u32>,

    /// Failed operations before the controller is marked FAILED.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds between recovery attempts on a FAILED controller. Zero
    /// leaves recovery to command-priority operations.
    #[serde(default = "default_recovery_interval")]
    pub recovery_interval_secs: u64,

    /// Per-phase deadline in milliseconds.
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_ms: u64,

    /// Per-operation deadline in milliseconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Phase executions allowed per operation.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Operations allowed to wait on the poller.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Retry backoff.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Priority interleaving.
    #[serde(default)]
    pub fairness: FairnessConfig,

    /// Periodic polling.
    #[serde(default)]
    pub poll: PollConfig,

    /// Controllers reachable on the link.
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_recovery_interval() -> u64 {
    wayside_core::operation::DEFAULT_RECOVERY_INTERVAL.as_secs()
}

fn default_phase_timeout() -> u64 {
    DEFAULT_PHASE_TIMEOUT_MS
}

fn default_operation_timeout() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_MS
}

fn default_max_steps() -> u32 {
    wayside_core::operation::DEFAULT_MAX_STEPS
}

fn default_queue_capacity() -> usize {
    wayside_core::poller::DEFAULT_QUEUE_CAPACITY
}

impl LinkConfig {
    /// Creates a link with default settings.
    pub fn new(id: impl Into<String>, protocol: Protocol, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            protocol,
            uri: uri.into(),
            enabled: true,
            modem: false,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            retries: None,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_interval_secs: default_recovery_interval(),
            phase_timeout_ms: DEFAULT_PHASE_TIMEOUT_MS,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            max_steps: default_max_steps(),
            queue_capacity: default_queue_capacity(),
            retry: RetryConfig::default(),
            fairness: FairnessConfig::default(),
            poll: PollConfig::default(),
            controllers: Vec::new(),
        }
    }

    /// Validates the link. `index` locates it in error messages.
    pub fn validate(&self, index: usize) -> ConfigResult<()> {
        let field = |name: &str| format!("links[{}].{}", index, name);

        if self.id.trim().is_empty() {
            return Err(ConfigError::validation(field("id"), "cannot be empty"));
        }
        let uri = self.link_uri()?;
        if uri.is_modem() != self.modem {
            let message = if self.modem {
                "dial-up link needs a modem:<phone> URI"
            } else {
                "modem: URI requires modem = true"
            };
            return Err(ConfigError::validation(field("uri"), message));
        }
        if self.failure_threshold < 1 {
            return Err(ConfigError::validation(field("failure_threshold"), "must be at least 1"));
        }
        if self.queue_capacity < 1 {
            return Err(ConfigError::validation(field("queue_capacity"), "must be at least 1"));
        }
        if self.max_steps < 1 {
            return Err(ConfigError::validation(field("max_steps"), "must be at least 1"));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::validation(field("read_timeout_ms"), "must be positive"));
        }
        if self.phase_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err(ConfigError::validation(field("operation_timeout_ms"), "timeouts must be positive"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::validation(field("retry.jitter"), "must be between 0.0 and 1.0"));
        }
        self.fairness.validate(&field("fairness"))?;
        self.poll.validate(&field("poll"))?;

        for (c, controller) in self.controllers.iter().enumerate() {
            controller.validate(&format!("links[{}].controllers[{}]", index, c), self.protocol)?;
        }
        Ok(())
    }

    /// Parses the link URI.
    pub fn link_uri(&self) -> ConfigResult<LinkUri> {
        self.uri
            .parse::<LinkUri>()
            .map_err(|e| ConfigError::invalid_uri(&self.id, e))
    }

    /// Returns the effective retry settings.
    pub fn retry_config(&self) -> RetryConfig {
        match self.retries {
            Some(retries) => self.retry.clone().with_max_retries(retries),
            None => self.retry.clone(),
        }
    }

    /// Builds the retry strategy.
    pub fn retry_strategy(&self) -> Arc<dyn RetryStrategy> {
        let config = self.retry_config();
        if config.max_retries == 0 {
            Arc::new(NoRetry::new())
        } else {
            Arc::new(ExponentialBackoff::new(config))
        }
    }

    /// Builds the operation limits.
    pub fn operation_policy(&self) -> OperationPolicy {
        OperationPolicy::new()
            .with_retry(self.retry_strategy())
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
            .with_phase_timeout(Duration::from_millis(self.phase_timeout_ms))
            .with_operation_timeout(Duration::from_millis(self.operation_timeout_ms))
            .with_max_steps(self.max_steps)
            .with_failure_threshold(self.failure_threshold)
            .with_recovery_interval(self.recovery_interval())
    }

    /// Returns the recovery cadence, or `None` when it is off.
    pub fn recovery_interval(&self) -> Option<Duration> {
        (self.recovery_interval_secs > 0).then(|| Duration::from_secs(self.recovery_interval_secs))
    }

    /// Builds the poller settings.
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::new(self.id.as_str())
            .with_queue_capacity(self.queue_capacity)
            .with_fairness(self.fairness.policy())
            .with_policy(self.operation_policy())
    }

    /// Returns the poll cadence, or `None` when polling is off.
    pub fn cadence(&self) -> Option<Cadence> {
        self.poll
            .enabled
            .then(|| Cadence::every_secs(self.poll.period_secs, self.poll.offset_secs))
    }

    /// Returns the TCP connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Builds the controllers of the link.
    pub fn build_controllers(&self) -> Vec<Arc<Controller>> {
        self.controllers
            .iter()
            .map(|c| Arc::new(c.build(&self.id)))
            .collect()
    }
}

// =============================================================================
// Fairness & Poll Configuration
// =============================================================================

/// Priority interleaving policy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FairnessKind {
    /// Highest priority first.
    #[default]
    Strict,
    /// Waiting operations rise in rank over time.
    Aging,
}

/// Priority interleaving of a link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FairnessConfig {
    /// Policy.
    #[serde(default)]
    pub policy: FairnessKind,

    /// Wait per tier for `aging`, in milliseconds.
    #[serde(default)]
    pub aging_interval_ms: Option<u64>,
}

impl FairnessConfig {
    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.policy == FairnessKind::Aging && self.aging_interval_ms.unwrap_or(0) == 0 {
            return Err(ConfigError::validation(
                format!("{}.aging_interval_ms", field),
                "aging needs a positive interval",
            ));
        }
        Ok(())
    }

    /// Returns the queue policy.
    pub fn policy(&self) -> FairnessPolicy {
        match (self.policy, self.aging_interval_ms) {
            (FairnessKind::Aging, Some(ms)) if ms > 0 => FairnessPolicy::Aging {
                interval: Duration::from_millis(ms),
            },
            _ => FairnessPolicy::Strict,
        }
    }
}

/// Periodic polling of a link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    /// Whether the link is polled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Poll period in seconds.
    #[serde(default = "default_poll_period")]
    pub period_secs: u64,

    /// Offset into the period in seconds.
    #[serde(default)]
    pub offset_secs: u64,
}

fn default_poll_period() -> u64 {
    DEFAULT_POLL_PERIOD_SECS
}

impl PollConfig {
    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.period_secs == 0 {
            return Err(ConfigError::validation(format!("{}.period_secs", field), "must be positive"));
        }
        if self.offset_secs >= self.period_secs {
            return Err(ConfigError::out_of_range(
                format!("{}.offset_secs", field),
                self.offset_secs,
                0,
                self.period_secs - 1,
            ));
        }
        Ok(())
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: DEFAULT_POLL_PERIOD_SECS,
            offset_secs: 0,
        }
    }
}

// =============================================================================
// Controller & Device Configuration
// =============================================================================

/// A controller reachable on a link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Unique controller identifier.
    pub id: String,

    /// Drop address on the link.
    #[serde(default)]
    pub drop: u16,

    /// Whether operations may target the controller.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Devices wired to the controller.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl ControllerConfig {
    fn validate(&self, field: &str, protocol: Protocol) -> ConfigResult<()> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::validation(format!("{}.id", field), "cannot be empty"));
        }
        if protocol == Protocol::PelcoD && !(1..=MAX_PELCOD_DROP).contains(&self.drop) {
            return Err(ConfigError::out_of_range(format!("{}.drop", field), self.drop, 1, MAX_PELCOD_DROP));
        }
        for (d, device) in self.devices.iter().enumerate() {
            if device.id.trim().is_empty() {
                return Err(ConfigError::validation(format!("{}.devices[{}].id", field, d), "cannot be empty"));
            }
            if device.kind.trim().is_empty() {
                return Err(ConfigError::validation(format!("{}.devices[{}].kind", field, d), "cannot be empty"));
            }
        }
        Ok(())
    }

    /// Builds the runtime controller.
    pub fn build(&self, link: &str) -> Controller {
        let controller = self
            .devices
            .iter()
            .fold(Controller::new(self.id.as_str(), link, self.drop), |c, d| c.with_device(d.build()));
        if !self.enabled {
            controller.set_enabled(false);
        }
        controller
    }
}

/// A field device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// Unique device identifier.
    pub id: String,

    /// Device kind (`tag_reader`, `camera`, `beacon`, `gps`).
    pub kind: String,

    /// Output pin.
    #[serde(default)]
    pub pin: Option<u16>,

    /// Verification pin.
    #[serde(default)]
    pub verify_pin: Option<u16>,

    /// Protocol specific parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl DeviceConfig {
    /// Builds the runtime device.
    pub fn build(&self) -> Device {
        let mut device = Device::new(self.id.as_str(), self.kind.as_str());
        if let Some(pin) = self.pin {
            device = device.with_pin(pin);
        }
        if let Some(pin) = self.verify_pin {
            device = device.with_verify_pin(pin);
        }
        self.params
            .iter()
            .fold(device, |d, (k, v)| d.with_param(k.as_str(), v.as_str()))
    }
}

// =============================================================================
// Modem Pool Configuration
// =============================================================================

/// The shared dial-up modems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModemPoolConfig {
    /// Modems of the pool.
    #[serde(default)]
    pub modems: Vec<ModemConfig>,
}

impl ModemPoolConfig {
    /// Validates the pool.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut names = HashSet::new();
        for (i, modem) in self.modems.iter().enumerate() {
            if !names.insert(modem.name.as_str()) {
                return Err(ConfigError::duplicate_id("modem", &modem.name));
            }
            if modem.port.trim().is_empty() {
                return Err(ConfigError::validation(format!("modem_pool.modems[{}].port", i), "cannot be empty"));
            }
            if modem.baud_rate == 0 {
                return Err(ConfigError::validation(format!("modem_pool.modems[{}].baud_rate", i), "must be positive"));
            }
        }
        Ok(())
    }

    /// Builds the modem specs.
    pub fn specs(&self) -> Vec<ModemSpec> {
        self.modems.iter().map(ModemConfig::spec).collect()
    }
}

/// One modem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModemConfig {
    /// Modem name.
    pub name: String,

    /// Serial port.
    pub port: String,

    /// Port baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Init string sent before dialing.
    #[serde(default)]
    pub init_string: Option<String>,

    /// Dial timeout in milliseconds.
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    wayside_comm::factory::DEFAULT_BAUD
}

fn default_dial_timeout() -> u64 {
    DEFAULT_DIAL_TIMEOUT_MS
}

impl ModemConfig {
    /// Builds the modem spec.
    pub fn spec(&self) -> ModemSpec {
        let spec = ModemSpec::new(self.name.as_str(), self.port.as_str(), self.baud_rate)
            .with_dial_timeout(Duration::from_millis(self.dial_timeout_ms));
        match &self.init_string {
            Some(init) => spec.with_init_string(init.as_str()),
            None => spec,
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
    /// Single line, compact.
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> LinkConfig {
        let mut link = LinkConfig::new("line-1", Protocol::Cbw, "tcp://10.0.0.5:80");
        link.controllers.push(ControllerConfig {
            id: "relay-1".into(),
            drop: 0,
            enabled: true,
            devices: vec![DeviceConfig {
                id: "b1".into(),
                kind: "beacon".into(),
                pin: Some(1),
                verify_pin: Some(5),
                params: BTreeMap::from([("confirm_ms".to_string(), "500".to_string())]),
            }],
        });
        link
    }

    fn config(links: Vec<LinkConfig>) -> WaysideConfig {
        WaysideConfig {
            links,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_link() {
        assert!(config(vec![link()]).validate().is_ok());
    }

    #[test]
    fn test_duplicate_ids() {
        let err = config(vec![link(), link()]).validate().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateId { kind: "link", .. }));

        let mut second = link();
        second.id = "line-2".into();
        let err = config(vec![link(), second]).validate().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateId { kind: "controller", .. }));
    }

    #[test]
    fn test_uri_must_match_modem_flag() {
        let mut l = link();
        l.uri = "modem:5551234".into();
        let err = l.validate(0).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "links[0].uri"));

        l.modem = true;
        assert!(l.validate(0).is_ok());
        let err = config(vec![l]).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "links[0].modem"));

        let mut l = link();
        l.uri = "udp://x:1".into();
        assert!(matches!(l.validate(0), Err(ConfigError::InvalidUri { .. })));
    }

    #[test]
    fn test_limits() {
        let mut l = link();
        l.failure_threshold = 0;
        assert!(l.validate(0).is_err());

        let mut l = link();
        l.poll.offset_secs = 30;
        assert!(matches!(l.validate(0), Err(ConfigError::OutOfRange { .. })));

        let mut l = link();
        l.fairness.policy = FairnessKind::Aging;
        assert!(l.validate(0).is_err());
        l.fairness.aging_interval_ms = Some(5000);
        assert!(l.validate(0).is_ok());
        assert_eq!(
            l.fairness.policy(),
            FairnessPolicy::Aging {
                interval: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn test_pelcod_drop_range() {
        let mut l = link();
        l.protocol = Protocol::PelcoD;
        assert!(matches!(l.validate(0), Err(ConfigError::OutOfRange { .. })));
        l.controllers[0].drop = 254;
        assert!(l.validate(0).is_ok());
        l.controllers[0].drop = 255;
        assert!(l.validate(0).is_err());
    }

    #[test]
    fn test_build_runtime_values() {
        let mut l = link();
        l.retries = Some(0);
        l.controllers[0].enabled = false;

        let policy = l.operation_policy();
        assert_eq!(policy.retry.max_retries(), 0);
        assert_eq!(policy.read_timeout, Duration::from_millis(DEFAULT_READ_TIMEOUT_MS));

        let controllers = l.build_controllers();
        assert_eq!(controllers.len(), 1);
        assert!(controllers[0].is_disabled());
        let device = &controllers[0].devices()[0];
        assert_eq!(device.pin(), Some(1));
        assert_eq!(device.verify_pin(), Some(5));
        assert_eq!(device.param("confirm_ms"), Some("500"));

        assert_eq!(l.cadence(), Some(Cadence::every_secs(30, 0)));
        l.poll.enabled = false;
        assert!(l.cadence().is_none());
    }

    #[test]
    fn test_recovery_interval() {
        let mut l = link();
        assert_eq!(l.operation_policy().recovery_interval, Some(Duration::from_secs(60)));

        l.recovery_interval_secs = 15;
        assert_eq!(l.operation_policy().recovery_interval, Some(Duration::from_secs(15)));

        l.recovery_interval_secs = 0;
        assert!(l.operation_policy().recovery_interval.is_none());
        assert!(l.validate(0).is_ok());
    }

    #[test]
    fn test_modem_specs() {
        let pool = ModemPoolConfig {
            modems: vec![ModemConfig {
                name: "m1".into(),
                port: "/dev/ttyUSB0".into(),
                baud_rate: 9600,
                init_string: Some("ATZ".into()),
                dial_timeout_ms: 30_000,
            }],
        };
        assert!(pool.validate().is_ok());
        let specs = pool.specs();
        assert_eq!(specs[0].init_string.as_deref(), Some("ATZ"));
        assert_eq!(specs[0].dial_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_log_level() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("verbose"), None);
        assert_eq!(LogLevel::Debug.as_str(), "debug");
    }
}
