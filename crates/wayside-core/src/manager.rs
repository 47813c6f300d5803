// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Link lifecycle management.
//!
//! The [`LinkManager`] maps each comm link to its running poller and each
//! controller to its owning link. It routes operations, exposes controller
//! health snapshots, and shuts pollers down.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = LinkManager::new(events.clone());
//! manager.add_link(config, messenger, controllers)?;
//! manager.enqueue(op)?;
//! manager.shutdown().await;
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::controller::{Controller, ControllerSnapshot};
use crate::error::EnqueueError;
use crate::hooks::EventDispatcher;
use crate::messenger::Messenger;
use crate::operation::Executable;
use crate::poller::{Poller, PollerConfig, PollerHandle, PollerStatsSnapshot};
use crate::types::{ControllerId, LinkId, Outcome};

// =============================================================================
// Link entry
// =============================================================================

/// A running link: its poller and controllers.
#[derive(Debug)]
pub struct LinkEntry {
    handle: PollerHandle,
    controllers: Vec<Arc<Controller>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LinkEntry {
    /// Returns the poller handle.
    pub fn handle(&self) -> &PollerHandle {
        &self.handle
    }

    /// Returns the link's controllers.
    pub fn controllers(&self) -> &[Arc<Controller>] {
        &self.controllers
    }
}

/// Summary of one link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkInfo {
    /// Link ID.
    pub id: LinkId,
    /// Whether the poller is still running.
    pub running: bool,
    /// Poller counters.
    pub stats: PollerStatsSnapshot,
    /// Controller health.
    pub controllers: Vec<ControllerSnapshot>,
}

// =============================================================================
// LinkManager
// =============================================================================

/// Owns the pollers of every link.
///
/// Backed by `DashMap` so producers on any task can route operations.
pub struct LinkManager {
    links: DashMap<LinkId, Arc<LinkEntry>>,
    controllers: DashMap<ControllerId, LinkId>,
    events: Arc<EventDispatcher>,
}

impl LinkManager {
    /// Creates an empty manager publishing to `events`.
    pub fn new(events: Arc<EventDispatcher>) -> Self {
        Self {
            links: DashMap::new(),
            controllers: DashMap::new(),
            events,
        }
    }

    /// Returns the shared event dispatcher.
    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// Spawns a poller for a link and registers its controllers.
    ///
    /// # Errors
    ///
    /// Fails if the link ID or one of the controller IDs is already
    /// registered. Nothing is spawned in that case.
    pub fn add_link(
        &self,
        config: PollerConfig,
        messenger: Box<dyn Messenger>,
        controllers: Vec<Arc<Controller>>,
    ) -> Result<PollerHandle, LinkError> {
        let link = config.link.clone();
        if self.links.contains_key(&link) {
            return Err(LinkError::DuplicateLink(link.to_string()));
        }
        if let Some(dup) = controllers.iter().find(|c| self.controllers.contains_key(c.id())) {
            return Err(LinkError::DuplicateController(dup.id().to_string()));
        }

        let (handle, task) = Poller::spawn(config, messenger, self.events.clone());
        for controller in &controllers {
            self.controllers.insert(controller.id().clone(), link.clone());
        }
        tracing::info!(link = %link, controllers = controllers.len(), "Added link");
        self.links.insert(
            link,
            Arc::new(LinkEntry {
                handle: handle.clone(),
                controllers,
                task: Mutex::new(Some(task)),
            }),
        );
        Ok(handle)
    }

    /// Stops a link's poller and forgets it.
    pub async fn remove_link(&self, link: &LinkId) -> bool {
        let Some((_, entry)) = self.links.remove(link) else {
            return false;
        };
        for controller in &entry.controllers {
            self.controllers.remove(controller.id());
        }
        stop_entry(&entry).await;
        tracing::info!(link = %link, "Removed link");
        true
    }

    /// Returns a link entry.
    pub fn link(&self, link: &LinkId) -> Option<Arc<LinkEntry>> {
        self.links.get(link).map(|r| r.value().clone())
    }

    /// Returns all link IDs.
    pub fn link_ids(&self) -> Vec<LinkId> {
        self.links.iter().map(|r| r.key().clone()).collect()
    }

    /// Returns the number of links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Finds a controller by ID.
    pub fn controller(&self, id: &ControllerId) -> Option<Arc<Controller>> {
        let link = self.controllers.get(id)?.value().clone();
        let entry = self.link(&link)?;
        entry.controllers.iter().find(|c| c.id() == id).cloned()
    }

    /// Routes an operation to the poller owning its controller.
    pub fn enqueue(&self, mut op: Box<dyn Executable>) -> Result<(), EnqueueError> {
        let controller = op.controller().id().clone();
        let entry = self
            .controllers
            .get(&controller)
            .and_then(|link| self.links.get(link.value()).map(|e| e.value().clone()));
        match entry {
            Some(entry) => entry.handle.try_enqueue(op),
            None => {
                op.finish(Outcome::Cancelled, Some("unknown controller".to_string()));
                Err(EnqueueError::UnknownController {
                    controller: controller.to_string(),
                })
            }
        }
    }

    /// Enables or disables a controller.
    ///
    /// Disabling cancels its queued and running operations at the next
    /// phase boundary.
    pub fn set_controller_enabled(&self, id: &ControllerId, enabled: bool) -> bool {
        match self.controller(id) {
            Some(controller) => {
                if let Some(change) = controller.set_enabled(enabled) {
                    tracing::info!(controller = %id, from = ?change.from, to = ?change.to, "Controller enablement changed");
                }
                true
            }
            None => false,
        }
    }

    /// Returns health snapshots of every controller.
    pub fn controller_snapshots(&self) -> Vec<ControllerSnapshot> {
        let mut out: Vec<_> = self
            .links
            .iter()
            .flat_map(|e| e.value().controllers.iter().map(|c| c.snapshot()).collect::<Vec<_>>())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Returns a summary of every link.
    pub fn link_infos(&self) -> Vec<LinkInfo> {
        let mut out: Vec<_> = self
            .links
            .iter()
            .map(|e| {
                let entry = e.value();
                LinkInfo {
                    id: e.key().clone(),
                    running: !entry.handle.is_closed(),
                    stats: entry.handle.stats(),
                    controllers: entry.controllers.iter().map(|c| c.snapshot()).collect(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Stops every poller and waits for them to exit.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.links.iter().map(|e| e.value().clone()).collect();
        for entry in &entries {
            entry.handle.shutdown();
        }
        for entry in &entries {
            stop_entry(entry).await;
        }
        tracing::info!(links = entries.len(), "All pollers stopped");
    }
}

async fn stop_entry(entry: &LinkEntry) {
    entry.handle.shutdown();
    let task = entry.task.lock().take();
    if let Some(task) = task {
        if let Err(e) = task.await {
            tracing::error!(link = %entry.handle.link(), error = %e, "Poller task failed");
        }
    }
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("links", &self.link_ids())
            .field("controllers", &self.controllers.len())
            .finish()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while registering links.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The link ID is already registered.
    #[error("Link already exists: {0}")]
    DuplicateLink(String),
    /// A controller ID is already owned by another link.
    #[error("Controller already registered: {0}")]
    DuplicateController(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommError, CommResult};
    use crate::messenger::TransportState;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullMessenger;

    #[async_trait]
    impl Messenger for NullMessenger {
        fn display_name(&self) -> String {
            "null".to_string()
        }
        fn state(&self) -> TransportState {
            TransportState::Disconnected
        }
        async fn open(&mut self) -> CommResult<()> {
            Err(CommError::connection_failed("unreachable"))
        }
        async fn close(&mut self) {}
        async fn write(&mut self, _bytes: &[u8]) -> CommResult<()> {
            Err(CommError::NotConnected)
        }
        async fn read(&mut self, _buf: &mut [u8], timeout: Duration) -> CommResult<usize> {
            Err(CommError::timeout(timeout))
        }
    }

    fn controllers(ids: &[&str], link: &str) -> Vec<Arc<Controller>> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Arc::new(Controller::new(*id, link, i as u16 + 1)))
            .collect()
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let manager = LinkManager::new(Arc::new(EventDispatcher::new()));
        manager
            .add_link(
                PollerConfig::new("line-1"),
                Box::new(NullMessenger),
                controllers(&["a", "b"], "line-1"),
            )
            .unwrap();

        assert_eq!(manager.link_count(), 1);
        assert!(manager.controller(&ControllerId::new("b")).is_some());
        assert!(manager.controller(&ControllerId::new("zz")).is_none());
        assert_eq!(manager.controller_snapshots().len(), 2);

        let err = manager
            .add_link(
                PollerConfig::new("line-2"),
                Box::new(NullMessenger),
                controllers(&["a"], "line-2"),
            )
            .unwrap_err();
        assert_eq!(err, LinkError::DuplicateController("a".to_string()));
        assert_eq!(manager.link_count(), 1);

        manager.shutdown().await;
        assert!(!manager.link_infos()[0].running);
    }

    #[tokio::test]
    async fn test_disable_controller() {
        let manager = LinkManager::new(Arc::new(EventDispatcher::new()));
        manager
            .add_link(
                PollerConfig::new("line-1"),
                Box::new(NullMessenger),
                controllers(&["a"], "line-1"),
            )
            .unwrap();
        let id = ControllerId::new("a");
        assert!(manager.set_controller_enabled(&id, false));
        assert!(manager.controller(&id).unwrap().is_disabled());
        assert!(!manager.set_controller_enabled(&ControllerId::new("x"), false));

        assert!(manager.remove_link(&LinkId::new("line-1")).await);
        assert!(manager.controller(&id).is_none());
    }
}
