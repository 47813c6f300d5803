// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node runtime assembly.
//!
//! Start-up order:
//!
//! 1. Event dispatcher with the tracing handler
//! 2. Modem pool and messenger factory
//! 3. One poller per enabled link, registered with the [`LinkManager`]
//! 4. One poll job per link with polling on, started by the [`Scheduler`]
//!
//! Shutdown stops the timers first so no new polls arrive, then the pollers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use wayside_comm::{MessengerFactory, ModemPool};
use wayside_config::{WaysideConfig, load_config};
use wayside_core::{
    EventDispatcher, LinkManager, PollJob, Scheduler, SchedulerHandle, TracingHandler,
};
use wayside_protocols::DriverRegistry;

use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

// =============================================================================
// WaysideRuntime
// =============================================================================

/// Runs the configured links until shutdown.
pub struct WaysideRuntime {
    config: Arc<WaysideConfig>,
    registry: Arc<DriverRegistry>,
    shutdown: ShutdownCoordinator,
    poll: bool,
}

impl WaysideRuntime {
    /// Creates a runtime with the built-in drivers.
    pub fn new(config: WaysideConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(DriverRegistry::with_defaults()),
            shutdown: ShutdownCoordinator::new(),
            poll: true,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &WaysideConfig {
        &self.config
    }

    /// Returns the shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Builds and starts every component.
    pub fn start(&self) -> BinResult<RuntimeComponents> {
        let events = Arc::new(EventDispatcher::new());
        events.register(Arc::new(TracingHandler::new()));

        let mut factory = MessengerFactory::new();
        if !self.config.modem_pool.modems.is_empty() {
            let pool = ModemPool::new(self.config.modem_pool.specs());
            info!(modems = pool.size(), "Modem pool ready");
            factory = factory.with_modem_pool(pool);
        }

        let manager = Arc::new(LinkManager::new(events));
        let mut scheduler = Scheduler::new();

        for link in &self.config.links {
            if !link.enabled {
                info!(link = %link.id, "Link disabled, skipping");
                continue;
            }
            let uri = link.link_uri()?;
            let messenger = factory
                .build(&link.id, &uri, Some(link.connect_timeout()))
                .map_err(|e| BinError::from(e).with_context(format!("link '{}'", link.id)))?;
            let controllers = link.build_controllers();
            let handle = manager.add_link(link.poller_config(), messenger, controllers.clone())?;

            match (self.poll, link.cadence()) {
                (true, Some(cadence)) => {
                    let source = self.registry.poll_source(link.protocol)?;
                    scheduler.add(cadence, Arc::new(PollJob::new(handle, controllers, source)));
                }
                _ => info!(link = %link.id, "Periodic polling off"),
            }
        }

        let scheduler = scheduler.start();
        info!(
            node = %self.config.node.name,
            links = manager.link_count(),
            "Wayside node started"
        );
        Ok(RuntimeComponents { manager, scheduler })
    }

    /// Runs until a shutdown signal arrives.
    pub async fn run(self) -> BinResult<()> {
        info!("Starting wayside v{}", wayside_core::VERSION);
        let components = self.start()?;
        self.shutdown.wait_for_shutdown().await;
        info!("Shutdown initiated, stopping links...");
        components.stop().await;
        info!("Wayside node stopped");
        Ok(())
    }
}

impl std::fmt::Debug for WaysideRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaysideRuntime")
            .field("node", &self.config.node.name)
            .field("links", &self.config.links.len())
            .field("poll", &self.poll)
            .finish()
    }
}

// =============================================================================
// RuntimeComponents
// =============================================================================

/// The running pieces of a started node.
pub struct RuntimeComponents {
    /// Pollers by link.
    pub manager: Arc<LinkManager>,
    /// Poll timers.
    pub scheduler: SchedulerHandle,
}

impl RuntimeComponents {
    /// Stops the timers, then the pollers.
    pub async fn stop(self) {
        self.scheduler.shutdown().await;
        self.manager.shutdown().await;
        for info in self.manager.link_infos() {
            if info.stats.failed > info.stats.succeeded {
                warn!(link = %info.id, succeeded = info.stats.succeeded, failed = info.stats.failed, "Link mostly failing");
            }
            info!(
                link = %info.id,
                succeeded = info.stats.succeeded,
                failed = info.stats.failed,
                cancelled = info.stats.cancelled,
                "Link stopped"
            );
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builds a [`WaysideRuntime`] from a file or a loaded configuration.
#[derive(Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<WaysideConfig>,
    registry: Option<DriverRegistry>,
    poll: Option<bool>,
}

impl RuntimeBuilder {
    /// Creates a builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the configuration from `path`.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Uses an already loaded configuration.
    pub fn config(mut self, config: WaysideConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the driver registry.
    pub fn registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Enables or disables periodic polling.
    pub fn poll(mut self, enabled: bool) -> Self {
        self.poll = Some(enabled);
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<WaysideRuntime> {
        let config = match (self.config, self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => load_config(&path)
                .map_err(|e| BinError::from(e).with_context(format!("loading {}", path.display())))?,
            (None, None) => return Err(BinError::config("No configuration provided")),
        };
        let mut runtime = WaysideRuntime::new(config);
        if let Some(registry) = self.registry {
            runtime.registry = Arc::new(registry);
        }
        if let Some(poll) = self.poll {
            runtime.poll = poll;
        }
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayside_config::LinkConfig;
    use wayside_core::Protocol;

    fn config() -> WaysideConfig {
        let mut link = LinkConfig::new("beacons", Protocol::Cbw, "tcp://127.0.0.1:9");
        link.poll.period_secs = 3600;
        let mut off = LinkConfig::new("spare", Protocol::E6, "tcp://127.0.0.1:10");
        off.enabled = false;
        WaysideConfig {
            links: vec![link, off],
            ..Default::default()
        }
    }

    #[test]
    fn test_builder_requires_config() {
        assert!(matches!(RuntimeBuilder::new().build(), Err(BinError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_start_registers_enabled_links() {
        let runtime = RuntimeBuilder::new().config(config()).build().unwrap();
        let components = runtime.start().unwrap();
        assert_eq!(components.manager.link_count(), 1);
        components.stop().await;
    }

    #[tokio::test]
    async fn test_missing_driver_fails_start() {
        let runtime = RuntimeBuilder::new()
            .config(config())
            .registry(DriverRegistry::new())
            .build()
            .unwrap();
        assert!(matches!(runtime.start(), Err(BinError::Driver(_))));
    }

    #[tokio::test]
    async fn test_modem_link_without_pool() {
        let mut config = config();
        config.links[0].uri = "modem:5551234".into();
        config.links[0].modem = true;
        let runtime = RuntimeBuilder::new().config(config).poll(false).build().unwrap();
        assert!(runtime.start().is_err());
    }
}
