// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Observer events emitted by pollers.
//!
//! Every finished operation produces an [`OperationEvent::Completed`]
//! carrying the controller's updated health and, for polls, the decoded
//! device state. Deferrals, dropped requests, status changes and session
//! open/close are reported as well. Handlers register with an
//! [`EventDispatcher`] shared by all pollers.
//!
//! # Example
//!
//! ```rust,ignore
//! use wayside_core::hooks::{CollectorHandler, EventDispatcher, TracingHandler};
//!
//! let dispatcher = Arc::new(EventDispatcher::new());
//! dispatcher.register(Arc::new(TracingHandler::new().with_level(TracingLevel::Info)));
//! let collector = Arc::new(CollectorHandler::new(1000));
//! dispatcher.register(collector.clone());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::operation::CompletionReport;
use crate::types::{ControllerId, ControllerStatus, DeviceState, LinkId, Outcome, Priority};

// =============================================================================
// Event Types
// =============================================================================

/// Events emitted by pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationEvent {
    /// An operation reached a terminal outcome.
    Completed {
        /// Owning link.
        link: LinkId,
        /// Target controller.
        controller: ControllerId,
        /// Procedure name.
        operation: String,
        /// Operation ID.
        op_id: String,
        /// Priority the operation ran at.
        priority: Priority,
        /// Final outcome.
        outcome: Outcome,
        /// Error description on failure.
        error: Option<String>,
        /// Cancellation reason.
        note: Option<String>,
        /// Phase executions.
        steps: u32,
        /// Retries spent.
        retries: u32,
        /// Controller status after the outcome.
        status: ControllerStatus,
        /// Consecutive failure count after the outcome.
        consecutive_failures: u32,
        /// Last successful exchange.
        last_success: Option<DateTime<Utc>>,
        /// Last error description.
        last_error: Option<String>,
        /// Device states published by the operation.
        devices: BTreeMap<String, DeviceState>,
    },

    /// An operation could not get a shared resource and was re-queued.
    Deferred {
        /// Owning link.
        link: LinkId,
        /// Target controller.
        controller: ControllerId,
        /// Procedure name.
        operation: String,
        /// Deferrals so far.
        deferrals: u32,
        /// Pause before the next attempt, in milliseconds.
        delay_ms: u64,
    },

    /// A request was rejected before reaching the queue.
    Dropped {
        /// Owning link.
        link: LinkId,
        /// Target controller.
        controller: ControllerId,
        /// Procedure name.
        operation: String,
        /// Why the request was rejected.
        reason: String,
    },

    /// A controller's status changed.
    StatusChanged {
        /// Owning link.
        link: LinkId,
        /// Controller.
        controller: ControllerId,
        /// Previous status.
        from: ControllerStatus,
        /// New status.
        to: ControllerStatus,
    },

    /// A link's messenger was opened.
    SessionOpened {
        /// Link.
        link: LinkId,
        /// Transport description.
        transport: String,
    },

    /// A link's messenger was closed.
    SessionClosed {
        /// Link.
        link: LinkId,
        /// Why the session was closed.
        reason: String,
    },
}

impl OperationEvent {
    /// Builds a completion event from a report.
    pub fn completed(link: &LinkId, report: &CompletionReport) -> Self {
        Self::Completed {
            link: link.clone(),
            controller: report.controller.id.clone(),
            operation: report.name.clone(),
            op_id: report.operation_id.to_string(),
            priority: report.priority,
            outcome: report.outcome,
            error: report.error.as_ref().map(|e| e.to_string()),
            note: report.note.clone(),
            steps: report.steps,
            retries: report.retries,
            status: report.controller.status,
            consecutive_failures: report.controller.consecutive_failures,
            last_success: report.controller.last_success,
            last_error: report.controller.last_error.clone(),
            devices: report
                .device_states
                .iter()
                .map(|(id, state)| (id.to_string(), (**state).clone()))
                .collect(),
        }
    }

    /// Returns the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Deferred { .. } => "deferred",
            Self::Dropped { .. } => "dropped",
            Self::StatusChanged { .. } => "status_changed",
            Self::SessionOpened { .. } => "session_opened",
            Self::SessionClosed { .. } => "session_closed",
        }
    }

    /// Returns the link the event belongs to.
    pub fn link(&self) -> &LinkId {
        match self {
            Self::Completed { link, .. }
            | Self::Deferred { link, .. }
            | Self::Dropped { link, .. }
            | Self::StatusChanged { link, .. }
            | Self::SessionOpened { link, .. }
            | Self::SessionClosed { link, .. } => link,
        }
    }

    /// Returns the controller the event concerns, if any.
    pub fn controller(&self) -> Option<&ControllerId> {
        match self {
            Self::Completed { controller, .. }
            | Self::Deferred { controller, .. }
            | Self::Dropped { controller, .. }
            | Self::StatusChanged { controller, .. } => Some(controller),
            Self::SessionOpened { .. } | Self::SessionClosed { .. } => None,
        }
    }
}

// =============================================================================
// Event Handler Trait
// =============================================================================

/// A handler for poller events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the handler name for logging.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Handles an event.
    ///
    /// Runs on the poller task. Expensive work should be spawned.
    async fn handle(&self, event: &OperationEvent);
}

// =============================================================================
// Built-in Handlers
// =============================================================================

/// Tracing log levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    #[default]
    Debug,
    /// Info level.
    Info,
    /// Warning level.
    Warn,
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            TracingLevel::Trace => tracing::trace!($($arg)+),
            TracingLevel::Debug => tracing::debug!($($arg)+),
            TracingLevel::Info => tracing::info!($($arg)+),
            TracingLevel::Warn => tracing::warn!($($arg)+),
        }
    };
}

/// Logs events through `tracing`.
///
/// Failures and status changes are always logged at `warn`.
#[derive(Debug, Default)]
pub struct TracingHandler {
    level: TracingLevel,
}

impl TracingHandler {
    /// Creates a handler logging at `debug`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the level for routine events.
    pub fn with_level(mut self, level: TracingLevel) -> Self {
        self.level = level;
        self
    }
}

#[async_trait]
impl EventHandler for TracingHandler {
    fn name(&self) -> &str {
        "tracing_handler"
    }

    async fn handle(&self, event: &OperationEvent) {
        match event {
            OperationEvent::Completed {
                link,
                controller,
                operation,
                outcome: Outcome::Failed,
                error,
                status,
                consecutive_failures,
                ..
            } => {
                tracing::warn!(
                    link = %link,
                    controller = %controller,
                    operation = %operation,
                    error = error.as_deref().unwrap_or(""),
                    status = ?status,
                    failures = consecutive_failures,
                    "Operation failed"
                );
            }
            OperationEvent::Completed {
                link,
                controller,
                operation,
                outcome,
                steps,
                ..
            } => {
                log_at!(
                    self.level,
                    link = %link,
                    controller = %controller,
                    operation = %operation,
                    outcome = %outcome,
                    steps,
                    "Operation finished"
                );
            }
            OperationEvent::StatusChanged {
                link,
                controller,
                from,
                to,
            } => {
                tracing::warn!(link = %link, controller = %controller, ?from, ?to, "Controller status changed");
            }
            OperationEvent::Dropped {
                link,
                controller,
                operation,
                reason,
            } => {
                tracing::warn!(link = %link, controller = %controller, operation = %operation, reason = %reason, "Request dropped");
            }
            other => {
                log_at!(self.level, event = other.event_type(), link = %other.link());
            }
        }
    }
}

/// Records events in memory.
#[derive(Debug, Default)]
pub struct CollectorHandler {
    events: RwLock<Vec<OperationEvent>>,
    max_events: usize,
}

impl CollectorHandler {
    /// Creates a collector keeping at most `max_events`.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::with_capacity(max_events.min(1000))),
            max_events: max_events.max(1),
        }
    }

    /// Returns the collected events.
    pub fn events(&self) -> Vec<OperationEvent> {
        self.events.read().clone()
    }

    /// Returns collected completion events.
    pub fn completions(&self) -> Vec<OperationEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| matches!(e, OperationEvent::Completed { .. }))
            .cloned()
            .collect()
    }

    /// Clears the collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns the number of collected events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns `true` if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventHandler for CollectorHandler {
    fn name(&self) -> &str {
        "collector_handler"
    }

    async fn handle(&self, event: &OperationEvent) {
        let mut events = self.events.write();
        if events.len() >= self.max_events {
            events.remove(0);
        }
        events.push(event.clone());
    }
}

// =============================================================================
// Event Dispatcher
// =============================================================================

/// Fans events out to registered handlers.
pub struct EventDispatcher {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    /// Creates a dispatcher with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Registers a handler.
    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Removes all handlers with the given name.
    pub fn unregister(&self, name: &str) {
        self.handlers.write().retain(|h| h.name() != name);
    }

    /// Delivers an event to every handler in registration order.
    pub async fn dispatch(&self, event: &OperationEvent) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler.handle(event).await;
        }
    }

    /// Returns the number of handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let names: Vec<_> = handlers.iter().map(|h| h.name().to_string()).collect();
        f.debug_struct("EventDispatcher")
            .field("handlers", &names)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn status_changed() -> OperationEvent {
        OperationEvent::StatusChanged {
            link: LinkId::new("line-1"),
            controller: ControllerId::new("ctl-1"),
            from: ControllerStatus::Timeout,
            to: ControllerStatus::Failed,
        }
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&status_changed()).unwrap();
        assert!(json.contains(r#""type":"status_changed""#));
        assert!(json.contains(r#""to":"failed""#));
    }

    #[test]
    fn test_event_accessors() {
        let event = status_changed();
        assert_eq!(event.event_type(), "status_changed");
        assert_eq!(event.link().as_str(), "line-1");
        assert_eq!(event.controller().map(|c| c.as_str()), Some("ctl-1"));

        let closed = OperationEvent::SessionClosed {
            link: LinkId::new("line-1"),
            reason: "idle".to_string(),
        };
        assert!(closed.controller().is_none());
    }

    #[tokio::test]
    async fn test_collector_bounded() {
        let collector = Arc::new(CollectorHandler::new(2));
        let dispatcher = EventDispatcher::new();
        dispatcher.register(collector.clone());
        dispatcher.register(Arc::new(TracingHandler::new()));
        assert_eq!(dispatcher.handler_count(), 2);

        for _ in 0..3 {
            dispatcher.dispatch(&status_changed()).await;
        }
        assert_eq!(collector.len(), 2);
        assert!(collector.completions().is_empty());

        dispatcher.unregister("collector_handler");
        assert_eq!(dispatcher.handler_count(), 1);
        collector.clear();
        assert!(collector.is_empty());
    }
}
