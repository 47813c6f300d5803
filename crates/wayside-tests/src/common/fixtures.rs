// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Prebuilt data shared by the integration suites.

use std::sync::Arc;
use std::time::Duration;

use wayside_comm::{ModemPool, ModemSpec};
use wayside_core::{Controller, Device, NoRetry, OperationPolicy, PollerConfig, RetryConfig, FixedDelay};

// =============================================================================
// Controllers
// =============================================================================

/// Controller fixtures.
pub struct ControllerFixtures;

impl ControllerFixtures {
    /// A bare controller at drop 1.
    pub fn plain(id: &str, link: &str) -> Arc<Controller> {
        Arc::new(Controller::new(id, link, 1))
    }

    /// A controller with one device of `kind`.
    pub fn with_device(id: &str, link: &str, kind: &str) -> (Arc<Controller>, Arc<Device>) {
        let controller = Arc::new(Controller::new(id, link, 1).with_device(Device::new(format!("{}-dev", id), kind)));
        let device = controller.devices()[0].clone();
        (controller, device)
    }
}

// =============================================================================
// Policies
// =============================================================================

/// Poller and policy fixtures.
pub struct PolicyFixtures;

impl PolicyFixtures {
    /// Fails on the first error, counting `threshold` failures to FAILED.
    pub fn no_retry(threshold: u32) -> OperationPolicy {
        OperationPolicy::new()
            .with_retry(Arc::new(NoRetry::new()))
            .with_read_timeout(Duration::from_millis(50))
            .with_failure_threshold(threshold)
    }

    /// Retries every error `retries` times without a pause.
    pub fn fixed_retries(retries: u32, threshold: u32) -> OperationPolicy {
        let retry = FixedDelay::new(RetryConfig::new().with_max_retries(retries).with_initial_delay(Duration::ZERO));
        OperationPolicy::new()
            .with_retry(Arc::new(retry))
            .with_read_timeout(Duration::from_millis(50))
            .with_failure_threshold(threshold)
    }

    /// A poller for `link` with short defer delays.
    pub fn poller(link: &str, policy: OperationPolicy) -> PollerConfig {
        PollerConfig::new(link)
            .with_policy(policy)
            .with_defer_delay(Duration::from_millis(10), Duration::from_millis(40))
    }
}

// =============================================================================
// Modems
// =============================================================================

/// A pool of `size` modems with no guard time.
pub fn modem_pool(size: usize) -> Arc<ModemPool> {
    ModemPool::new(
        (0..size)
            .map(|i| {
                ModemSpec::new(format!("modem-{}", i), format!("/dev/ttyM{}", i), 9600)
                    .with_init_string("ATZ")
                    .with_dial_timeout(Duration::from_secs(2))
                    .with_guard_time(Duration::ZERO)
            })
            .collect(),
    )
}

// =============================================================================
// Configuration text
// =============================================================================

/// Configuration documents in every supported format.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A two-link node with a modem pool, as YAML.
    pub fn yaml() -> &'static str {
        r#"
node:
  name: district-7

logging:
  level: debug
  format: json

modem_pool:
  modems:
    - name: modem-a
      port: /dev/ttyS4
      baud_rate: 19200
      init_string: ATZ

links:
  - id: beacons
    protocol: cbw
    uri: tcp://10.0.0.5:80
    failure_threshold: 4
    poll:
      period_secs: 60
      offset_secs: 5
    controllers:
      - id: beacon-1
        drop: 1
        devices:
          - id: flasher
            kind: beacon
            pin: 3

  - id: readers
    protocol: e6
    uri: modem:5551234
    modem: true
    retries: 2
    controllers:
      - id: reader-1
        drop: 2
        devices:
          - id: rf
            kind: tag_reader
"#
    }

    /// A one-link node as TOML.
    pub fn toml() -> &'static str {
        r#"
[node]
name = "toml-node"

[[links]]
id = "gps"
protocol = "sierragx"
uri = "tcp://10.0.0.9:4001"

[[links.controllers]]
id = "modem-1"
drop = 1

[[links.controllers.devices]]
id = "fix"
kind = "gps"
"#
    }

    /// A one-link node as JSON.
    pub fn json() -> &'static str {
        r#"{
  "node": { "name": "json-node" },
  "links": [
    {
      "id": "cameras",
      "protocol": "pelcod",
      "uri": "serial:///dev/ttyS1?baud=2400",
      "poll": { "enabled": false },
      "controllers": [ { "id": "cam-1", "drop": 12 } ]
    }
  ]
}"#
    }
}
