// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol drivers and their registry.
//!
//! A [`ProtocolDriver`] knows which recurring operations its protocol runs
//! against a controller. The [`DriverRegistry`] maps each [`Protocol`] to its
//! driver so the runtime can build one poll job per link without knowing
//! any protocol by name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use wayside_core::{Controller, Executable, OperationPolicy, PollSource, Protocol};

use crate::cbw::CbwDriver;
use crate::e6::E6Driver;
use crate::pelcod::PelcoDDriver;
use crate::sierragx::SierraGxDriver;

// =============================================================================
// ProtocolDriver
// =============================================================================

/// Builds the periodic operations of one protocol.
pub trait ProtocolDriver: Send + Sync {
    /// Returns the protocol this driver implements.
    fn protocol(&self) -> Protocol;

    /// Returns the recurring poll operations for `controller`.
    ///
    /// Store-only protocols return nothing.
    fn poll_operations(&self, controller: &Arc<Controller>) -> Vec<Box<dyn Executable>>;

    /// Suggested operation limits for links of this protocol.
    fn default_policy(&self) -> OperationPolicy {
        OperationPolicy::default()
    }
}

/// Adapts a driver to the scheduler's [`PollSource`].
#[derive(Clone)]
pub struct DriverPollSource(Arc<dyn ProtocolDriver>);

impl DriverPollSource {
    /// Wraps a driver.
    pub fn new(driver: Arc<dyn ProtocolDriver>) -> Self {
        Self(driver)
    }
}

impl PollSource for DriverPollSource {
    fn poll_operations(&self, controller: &Arc<Controller>) -> Vec<Box<dyn Executable>> {
        self.0.poll_operations(controller)
    }
}

impl fmt::Debug for DriverPollSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DriverPollSource").field(&self.0.protocol()).finish()
    }
}

// =============================================================================
// DriverRegistry
// =============================================================================

/// Errors raised when looking up a driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// No driver is registered for the protocol.
    #[error("No driver registered for protocol '{0}'")]
    NotRegistered(Protocol),
}

/// A registry of protocol drivers.
pub struct DriverRegistry {
    drivers: HashMap<Protocol, Arc<dyn ProtocolDriver>>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Creates a registry holding every built-in driver.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(E6Driver::new()));
        registry.register(Arc::new(PelcoDDriver::new()));
        registry.register(Arc::new(CbwDriver::new()));
        registry.register(Arc::new(SierraGxDriver::new()));
        registry
    }

    /// Registers a driver, replacing any driver of the same protocol.
    pub fn register(&mut self, driver: Arc<dyn ProtocolDriver>) {
        let protocol = driver.protocol();
        self.drivers.insert(protocol, driver);
        tracing::debug!(%protocol, "Registered protocol driver");
    }

    /// Removes a driver.
    pub fn unregister(&mut self, protocol: Protocol) -> Option<Arc<dyn ProtocolDriver>> {
        self.drivers.remove(&protocol)
    }

    /// Returns the driver of a protocol.
    pub fn get(&self, protocol: Protocol) -> Result<Arc<dyn ProtocolDriver>, DriverError> {
        self.drivers
            .get(&protocol)
            .cloned()
            .ok_or(DriverError::NotRegistered(protocol))
    }

    /// Returns a poll source backed by the protocol's driver.
    pub fn poll_source(&self, protocol: Protocol) -> Result<Arc<dyn PollSource>, DriverError> {
        Ok(Arc::new(DriverPollSource::new(self.get(protocol)?)))
    }

    /// Returns the registered protocols in a stable order.
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut out: Vec<_> = self.drivers.keys().copied().collect();
        out.sort();
        out
    }

    /// Returns `true` if a driver is registered for `protocol`.
    pub fn supports(&self, protocol: Protocol) -> bool {
        self.drivers.contains_key(&protocol)
    }

    /// Returns the number of drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Returns `true` if no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayside_core::Device;

    #[test]
    fn test_defaults_cover_every_protocol() {
        let registry = DriverRegistry::with_defaults();
        assert_eq!(registry.len(), Protocol::ALL.len());
        assert_eq!(registry.protocols(), Protocol::ALL.to_vec());
        for protocol in Protocol::ALL {
            assert_eq!(registry.get(protocol).unwrap().protocol(), protocol);
        }
    }

    #[test]
    fn test_missing_driver() {
        let mut registry = DriverRegistry::with_defaults();
        assert!(registry.unregister(Protocol::E6).is_some());
        assert!(!registry.supports(Protocol::E6));
        assert_eq!(
            registry.poll_source(Protocol::E6).err(),
            Some(DriverError::NotRegistered(Protocol::E6))
        );
    }

    #[test]
    fn test_poll_source_builds_operations() {
        let registry = DriverRegistry::with_defaults();
        let controller = Arc::new(
            Controller::new("relay-1", "line-1", 1)
                .with_device(Device::new("b1", "beacon").with_pin(1))
                .with_device(Device::new("b2", "beacon").with_pin(2)),
        );
        let source = registry.poll_source(Protocol::Cbw).unwrap();
        assert_eq!(source.poll_operations(&controller).len(), 2);

        let source = registry.poll_source(Protocol::PelcoD).unwrap();
        assert!(source.poll_operations(&controller).is_empty());
    }
}
