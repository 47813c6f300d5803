// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The per-link worker.
//!
//! A [`Poller`] owns one link's [`Messenger`] and its [`OperationQueue`]. It
//! runs as a single task, so exactly one operation touches the transport at
//! a time. Producers hold a cloneable [`PollerHandle`] whose `try_enqueue`
//! never blocks. At most `queue_capacity` operations are held at once, the
//! running one included; beyond that a request is rejected.
//!
//! # Loop
//!
//! ```text
//! ┌─▶ accept incoming ─▶ purge cancelled ─▶ pop best ready entry ─┐
//! │                                             │ none            │
//! │                           close session, wait for work        │
//! │                                                               ▼
//! └──────── finish + report ◀── step* (open session on demand) ◀──┘
//! ```
//!
//! # Session policy
//!
//! The messenger is opened on demand, kept open while ready work remains,
//! and closed when the queue drains, before a retry that needs a reconnect,
//! when an operation is deferred, and on shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::controller::Admission;
use crate::error::{CommError, EnqueueError};
use crate::hooks::{EventDispatcher, OperationEvent};
use crate::messenger::{Messenger, TransportState};
use crate::operation::{Executable, OperationPolicy, StepOutcome};
use crate::queue::{FairnessPolicy, OperationQueue, QueueEntry};
use crate::types::{LinkId, Outcome};

// =============================================================================
// Configuration
// =============================================================================

/// Default number of operations one poller holds.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Settings of one poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Link served by the poller.
    pub link: LinkId,
    /// Operations held at once, the running one included.
    pub queue_capacity: usize,
    /// Interleaving of priorities.
    pub fairness: FairnessPolicy,
    /// Limits applied to every operation.
    pub policy: OperationPolicy,
    /// First pause after a deferral.
    pub defer_delay: Duration,
    /// Longest pause after repeated deferrals.
    pub max_defer_delay: Duration,
}

impl PollerConfig {
    /// Creates a configuration with defaults for `link`.
    pub fn new(link: impl Into<LinkId>) -> Self {
        Self {
            link: link.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            fairness: FairnessPolicy::Strict,
            policy: OperationPolicy::default(),
            defer_delay: Duration::from_secs(1),
            max_defer_delay: Duration::from_secs(30),
        }
    }

    /// Sets the capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets the fairness policy.
    pub fn with_fairness(mut self, fairness: FairnessPolicy) -> Self {
        self.fairness = fairness;
        self
    }

    /// Sets the operation policy.
    pub fn with_policy(mut self, policy: OperationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the deferral pauses.
    pub fn with_defer_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.defer_delay = initial;
        self.max_defer_delay = max.max(initial);
        self
    }

    /// Returns the pause after the given number of deferrals.
    pub fn defer_delay_for(&self, deferrals: u32) -> Duration {
        let factor = 2u32.saturating_pow(deferrals.min(16));
        self.defer_delay
            .saturating_mul(factor)
            .min(self.max_defer_delay)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters of one poller.
#[derive(Debug, Default)]
pub struct PollerStats {
    accepted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    deferred: AtomicU64,
    rejected: AtomicU64,
    sessions: AtomicU64,
}

impl PollerStats {
    fn record_outcome(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Success => &self.succeeded,
            Outcome::Failed => &self.failed,
            Outcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the counters.
    pub fn snapshot(&self) -> PollerStatsSnapshot {
        PollerStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of poller counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerStatsSnapshot {
    /// Requests accepted into the inbox.
    pub accepted: u64,
    /// Operations finished successfully.
    pub succeeded: u64,
    /// Operations finished failed.
    pub failed: u64,
    /// Operations cancelled (duplicates, suppressed, shutdown included).
    pub cancelled: u64,
    /// Deferrals.
    pub deferred: u64,
    /// Requests rejected because the poller was full or closed.
    pub rejected: u64,
    /// Messenger sessions opened.
    pub sessions: u64,
}

// =============================================================================
// Backlog
// =============================================================================

/// Operations held by a poller, from reservation until they finish.
///
/// Producers reserve a slot before sending. The poller releases it when the
/// operation finishes. A deferred operation keeps its slot.
#[derive(Debug)]
struct Backlog {
    held: AtomicUsize,
    capacity: usize,
}

impl Backlog {
    fn new(capacity: usize) -> Self {
        Self {
            held: AtomicUsize::new(0),
            capacity: capacity.max(1),
        }
    }

    fn try_reserve(&self) -> bool {
        self.held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        let _ = self
            .held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn len(&self) -> usize {
        self.held.load(Ordering::Acquire)
    }
}

/// An operation in the inbox and the instant it was offered.
struct Inbound {
    op: Box<dyn Executable>,
    arrived: Instant,
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable producer side of a poller.
#[derive(Debug, Clone)]
pub struct PollerHandle {
    link: LinkId,
    tx: mpsc::Sender<Inbound>,
    backlog: Arc<Backlog>,
    shutdown: Arc<watch::Sender<bool>>,
    stats: Arc<PollerStats>,
}

impl PollerHandle {
    /// Returns the link served by the poller.
    pub fn link(&self) -> &LinkId {
        &self.link
    }

    /// Offers an operation without waiting.
    ///
    /// A rejected operation is finished as cancelled on the caller's task.
    /// Cancelled operations neither record health on the controller nor
    /// publish device state, so the rejection changes nothing the poller
    /// owns.
    pub fn try_enqueue(&self, op: Box<dyn Executable>) -> Result<(), EnqueueError> {
        if !self.backlog.try_reserve() {
            return Err(self.reject_full(op));
        }
        let inbound = Inbound {
            op,
            arrived: Instant::now(),
        };
        match self.tx.try_send(inbound) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(inbound)) => {
                self.backlog.release();
                Err(self.reject_full(inbound.op))
            }
            Err(mpsc::error::TrySendError::Closed(inbound)) => {
                self.backlog.release();
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                let mut op = inbound.op;
                op.finish(Outcome::Cancelled, Some("poller closed".to_string()));
                Err(EnqueueError::Closed {
                    link: self.link.to_string(),
                })
            }
        }
    }

    fn reject_full(&self, mut op: Box<dyn Executable>) -> EnqueueError {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            link = %self.link,
            operation = op.name(),
            controller = %op.controller().id(),
            held = self.backlog.len(),
            "Poller queue full, dropping request"
        );
        let operation = op.identity().to_string();
        op.finish(Outcome::Cancelled, Some("queue full".to_string()));
        EnqueueError::Full {
            link: self.link.to_string(),
            operation,
        }
    }

    /// Returns the number of operations held, the running one included.
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Asks the poller to stop after the current phase.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Returns `true` once the poller task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Returns the poller's counters.
    pub fn stats(&self) -> PollerStatsSnapshot {
        self.stats.snapshot()
    }
}

// =============================================================================
// Poller
// =============================================================================

/// The single worker of one link.
pub struct Poller {
    config: PollerConfig,
    messenger: Box<dyn Messenger>,
    queue: OperationQueue,
    rx: mpsc::Receiver<Inbound>,
    backlog: Arc<Backlog>,
    shutdown: watch::Receiver<bool>,
    events: Arc<EventDispatcher>,
    stats: Arc<PollerStats>,
}

impl Poller {
    /// Creates a poller and its handle.
    pub fn new(
        config: PollerConfig,
        messenger: Box<dyn Messenger>,
        events: Arc<EventDispatcher>,
    ) -> (Self, PollerHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(PollerStats::default());
        let backlog = Arc::new(Backlog::new(config.queue_capacity));
        let handle = PollerHandle {
            link: config.link.clone(),
            tx,
            backlog: backlog.clone(),
            shutdown: Arc::new(shutdown_tx),
            stats: stats.clone(),
        };
        let poller = Self {
            queue: OperationQueue::new(config.fairness),
            config,
            messenger,
            rx,
            backlog,
            shutdown: shutdown_rx,
            events,
            stats,
        };
        (poller, handle)
    }

    /// Spawns the poller on the current runtime.
    pub fn spawn(
        config: PollerConfig,
        messenger: Box<dyn Messenger>,
        events: Arc<EventDispatcher>,
    ) -> (PollerHandle, JoinHandle<()>) {
        let (poller, handle) = Self::new(config, messenger, events);
        (handle, tokio::spawn(poller.run()))
    }

    /// Runs until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(
            link = %self.config.link,
            transport = %self.messenger.display_name(),
            fairness = %self.config.fairness,
            "Poller started"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let mut inbox_closed = false;
            loop {
                match self.rx.try_recv() {
                    Ok(inbound) => self.accept(inbound).await,
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        inbox_closed = true;
                        break;
                    }
                }
            }
            self.purge_cancelled().await;

            if let Some(entry) = self.queue.pop_ready(Instant::now()) {
                if !self.execute(entry).await {
                    self.backlog.release();
                }
                continue;
            }
            if inbox_closed && self.queue.is_empty() {
                break;
            }

            self.close_session("idle").await;
            let wake_at = self.queue.next_ready_at();
            tokio::select! {
                inbound = self.rx.recv(), if !inbox_closed => match inbound {
                    Some(inbound) => self.accept(inbound).await,
                    None if self.queue.is_empty() => break,
                    None => {}
                },
                _ = wait_until(wake_at), if wake_at.is_some() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.stop().await;
    }

    async fn accept(&mut self, inbound: Inbound) {
        let Inbound { op, arrived } = inbound;
        tracing::trace!(
            link = %self.config.link,
            operation = op.name(),
            identity = %op.identity(),
            priority = ?op.priority(),
            "Operation queued"
        );
        if let Err(duplicate) = self.queue.push_at(op, arrived) {
            self.backlog.release();
            tracing::debug!(
                link = %self.config.link,
                identity = %duplicate.identity(),
                "Merged duplicate operation"
            );
            self.complete(duplicate, Outcome::Cancelled, Some("duplicate")).await;
        }
    }

    async fn purge_cancelled(&mut self) {
        for entry in self.queue.remove_where(|op| op.is_cancelled()) {
            self.backlog.release();
            self.complete(entry.op, Outcome::Cancelled, Some("cancelled")).await;
        }
    }

    /// Runs one entry. Returns `true` if it went back to the queue.
    async fn execute(&mut self, entry: QueueEntry) -> bool {
        let mut entry = entry;
        if entry.op.is_cancelled() {
            self.complete(entry.op, Outcome::Cancelled, Some("cancelled")).await;
            return false;
        }
        let admission = entry
            .op
            .controller()
            .admit(entry.op.priority(), self.config.policy.recovery_interval);
        match admission {
            Admission::Admitted => {}
            Admission::Recovery => tracing::info!(
                link = %self.config.link,
                controller = %entry.op.controller().id(),
                operation = entry.op.name(),
                "Recovery attempt on failed controller"
            ),
            Admission::Suppressed => {
                tracing::debug!(
                    link = %self.config.link,
                    controller = %entry.op.controller().id(),
                    operation = entry.op.name(),
                    status = ?entry.op.controller().status(),
                    "Operation suppressed"
                );
                self.complete(entry.op, Outcome::Cancelled, Some("suppressed")).await;
                return false;
            }
        }

        entry.op.begin(&self.config.policy);
        tracing::debug!(
            link = %self.config.link,
            op_id = %entry.op.id(),
            operation = entry.op.name(),
            controller = %entry.op.controller().id(),
            priority = ?entry.op.priority(),
            "Operation started"
        );

        loop {
            if entry.op.is_cancelled() {
                self.complete(entry.op, Outcome::Cancelled, Some("cancelled")).await;
                return false;
            }
            if *self.shutdown.borrow() {
                self.complete(entry.op, Outcome::Cancelled, Some("shutdown")).await;
                return false;
            }

            let outcome = match self.open_session().await {
                Ok(()) => entry.op.step(&mut *self.messenger).await,
                Err(error) => entry.op.open_failed(error),
            };

            match outcome {
                StepOutcome::Continue => {}
                StepOutcome::Retry { delay, reconnect } => {
                    if reconnect {
                        self.close_session("transport error").await;
                    }
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                StepOutcome::Finished(outcome) => {
                    self.complete(entry.op, outcome, None).await;
                    return false;
                }
                StepOutcome::Deferred => {
                    self.close_session("resource unavailable").await;
                    self.defer(entry).await;
                    return true;
                }
            }
        }
    }

    async fn defer(&mut self, entry: QueueEntry) {
        let delay = self.config.defer_delay_for(entry.deferrals);
        self.stats.deferred.fetch_add(1, Ordering::Relaxed);
        let event = OperationEvent::Deferred {
            link: self.config.link.clone(),
            controller: entry.op.controller().id().clone(),
            operation: entry.op.name().to_string(),
            deferrals: entry.deferrals + 1,
            delay_ms: delay.as_millis() as u64,
        };
        tracing::debug!(
            link = %self.config.link,
            operation = entry.op.name(),
            delay_ms = delay.as_millis() as u64,
            "Operation deferred"
        );
        self.queue.defer(entry, Instant::now() + delay);
        self.events.dispatch(&event).await;
    }

    async fn complete(&mut self, mut op: Box<dyn Executable>, outcome: Outcome, note: Option<&str>) {
        let Some(report) = op.finish(outcome, note.map(str::to_string)) else {
            return;
        };
        self.stats.record_outcome(report.outcome);
        tracing::debug!(
            link = %self.config.link,
            op_id = %report.operation_id,
            operation = %report.name,
            outcome = %report.outcome,
            steps = report.steps,
            retries = report.retries,
            "Operation finished"
        );
        self.events
            .dispatch(&OperationEvent::completed(&self.config.link, &report))
            .await;
        if let Some(change) = report.status_change {
            self.events
                .dispatch(&OperationEvent::StatusChanged {
                    link: self.config.link.clone(),
                    controller: report.controller.id.clone(),
                    from: change.from,
                    to: change.to,
                })
                .await;
        }
    }

    async fn open_session(&mut self) -> Result<(), CommError> {
        match self.messenger.state() {
            TransportState::Connected => return Ok(()),
            TransportState::Error | TransportState::Connecting => self.messenger.close().await,
            TransportState::Disconnected => {}
        }
        self.messenger.open().await?;
        self.stats.sessions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            link = %self.config.link,
            transport = %self.messenger.display_name(),
            "Session opened"
        );
        self.events
            .dispatch(&OperationEvent::SessionOpened {
                link: self.config.link.clone(),
                transport: self.messenger.display_name(),
            })
            .await;
        Ok(())
    }

    async fn close_session(&mut self, reason: &str) {
        if self.messenger.state() == TransportState::Disconnected {
            return;
        }
        self.messenger.close().await;
        tracing::debug!(link = %self.config.link, reason, "Session closed");
        self.events
            .dispatch(&OperationEvent::SessionClosed {
                link: self.config.link.clone(),
                reason: reason.to_string(),
            })
            .await;
    }

    async fn stop(&mut self) {
        self.rx.close();
        while let Ok(inbound) = self.rx.try_recv() {
            self.backlog.release();
            self.complete(inbound.op, Outcome::Cancelled, Some("shutdown")).await;
        }
        for entry in self.queue.drain() {
            self.backlog.release();
            self.complete(entry.op, Outcome::Cancelled, Some("shutdown")).await;
        }
        self.close_session("shutdown").await;
        tracing::info!(link = %self.config.link, "Poller stopped");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Controller, Device};
    use crate::error::CommResult;
    use crate::operation::{CleanupContext, Operation};
    use crate::phase::Transition;
    use crate::property::{Codec, CommMessage, MessageContext, Property, RequestKind};
    use crate::retry::NoRetry;
    use crate::types::{ControllerStatus, DeviceState, Priority};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Clone)]
    struct Ping;

    impl Property for Ping {}

    /// Fails every exchange while `fail` is set and holds each one for
    /// `hold_ms`.
    struct RecordingCodec {
        fail: AtomicBool,
        hold_ms: AtomicU64,
    }

    #[async_trait]
    impl Codec for RecordingCodec {
        type Property = Ping;

        fn name(&self) -> &'static str {
            "recording"
        }

        async fn exchange(
            &self,
            _messenger: &mut dyn Messenger,
            ctx: &MessageContext,
            _kind: RequestKind,
            _props: &mut [Ping],
        ) -> CommResult<()> {
            let hold = self.hold_ms.load(Ordering::SeqCst);
            if hold > 0 {
                tokio::time::sleep(Duration::from_millis(hold)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(CommError::timeout(ctx.read_timeout));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingMessenger {
        open: bool,
        opens: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Messenger for CountingMessenger {
        fn display_name(&self) -> String {
            "counting".to_string()
        }

        fn state(&self) -> TransportState {
            if self.open {
                TransportState::Connected
            } else {
                TransportState::Disconnected
            }
        }

        async fn open(&mut self) -> CommResult<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.open = true;
            Ok(())
        }

        async fn close(&mut self) {
            self.open = false;
        }

        async fn write(&mut self, _bytes: &[u8]) -> CommResult<()> {
            Ok(())
        }

        async fn read(&mut self, _buf: &mut [u8], timeout: Duration) -> CommResult<usize> {
            Err(CommError::timeout(timeout))
        }
    }

    struct Tagged {
        tag: &'static str,
        priority: Priority,
        log: Arc<Mutex<Vec<String>>>,
        cleanups: Arc<AtomicU64>,
    }

    #[async_trait]
    impl crate::operation::Procedure for Tagged {
        type Codec = RecordingCodec;
        type Phase = ();

        fn name(&self) -> &'static str {
            "tagged"
        }

        fn priority(&self) -> Priority {
            self.priority
        }

        fn params(&self) -> String {
            self.tag.to_string()
        }

        fn begin(&mut self) {}

        async fn step(
            &mut self,
            _phase: &mut (),
            mess: &mut CommMessage<'_, RecordingCodec>,
        ) -> CommResult<Transition<()>> {
            mess.query(&mut Ping).await?;
            self.log.lock().push(self.tag.to_string());
            Ok(Transition::Done)
        }

        fn cleanup(&mut self, ctx: &mut CleanupContext<'_>) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            let controller = ctx.controller().clone();
            if let Some(device) = controller.devices().first() {
                ctx.publish(device, DeviceState::new().with("last", self.tag));
            }
        }
    }

    struct Fixture {
        codec: Arc<RecordingCodec>,
        controller: Arc<Controller>,
        log: Arc<Mutex<Vec<String>>>,
        cleanups: Arc<AtomicU64>,
    }

    impl Fixture {
        fn new() -> Self {
            let log = Arc::new(Mutex::new(Vec::new()));
            Self {
                codec: Arc::new(RecordingCodec {
                    fail: AtomicBool::new(false),
                    hold_ms: AtomicU64::new(0),
                }),
                controller: Arc::new(
                    Controller::new("ctl", "line", 1).with_device(Device::new("sign", "dms")),
                ),
                log,
                cleanups: Arc::new(AtomicU64::new(0)),
            }
        }

        fn last_published(&self) -> Option<String> {
            let state = self.controller.devices()[0].state();
            state.get("last").and_then(|v| v.as_str()).map(str::to_string)
        }

        fn op(&self, tag: &'static str, priority: Priority) -> Box<dyn Executable> {
            Operation::new(
                Tagged {
                    tag,
                    priority,
                    log: self.log.clone(),
                    cleanups: self.cleanups.clone(),
                },
                self.codec.clone(),
                self.controller.clone(),
            )
            .boxed()
        }
    }

    fn config() -> PollerConfig {
        config_with_recovery(None)
    }

    fn config_with_recovery(interval: Option<Duration>) -> PollerConfig {
        PollerConfig::new("line").with_policy(
            OperationPolicy::new()
                .with_retry(Arc::new(NoRetry::new()))
                .with_failure_threshold(2)
                .with_recovery_interval(interval),
        )
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_priority_order_and_dedup() {
        let fx = Fixture::new();
        let events = Arc::new(EventDispatcher::new());
        let opens = Arc::new(AtomicU64::new(0));
        let messenger = CountingMessenger {
            open: false,
            opens: opens.clone(),
        };
        let (poller, handle) = Poller::new(config(), Box::new(messenger), events);

        handle.try_enqueue(fx.op("poll-a", Priority::Poll)).unwrap();
        handle.try_enqueue(fx.op("poll-a", Priority::Poll)).unwrap();
        handle.try_enqueue(fx.op("diag", Priority::Diagnostic)).unwrap();
        handle.try_enqueue(fx.op("cmd", Priority::Command)).unwrap();

        let task = tokio::spawn(poller.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(*fx.log.lock(), vec!["cmd", "diag", "poll-a"]);
        let stats = handle.stats();
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_controller_waits_for_command_without_recovery() {
        let fx = Fixture::new();
        fx.codec.fail.store(true, Ordering::SeqCst);
        let events = Arc::new(EventDispatcher::new());
        let (handle, task) = Poller::spawn(config(), Box::new(CountingMessenger::default()), events);

        handle.try_enqueue(fx.op("p1", Priority::Poll)).unwrap();
        handle.try_enqueue(fx.op("p2", Priority::Poll)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.controller.status(), ControllerStatus::Failed);

        fx.codec.fail.store(false, Ordering::SeqCst);
        handle.try_enqueue(fx.op("p3", Priority::Poll)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.try_enqueue(fx.op("c1", Priority::Command)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(*fx.log.lock(), vec!["c1"]);
        assert_eq!(fx.controller.status(), ControllerStatus::Ok);
    }

    #[tokio::test]
    async fn test_failed_controller_recovers_without_command() {
        let fx = Fixture::new();
        fx.codec.fail.store(true, Ordering::SeqCst);
        let events = Arc::new(EventDispatcher::new());
        let (handle, task) = Poller::spawn(
            config_with_recovery(Some(Duration::from_millis(150))),
            Box::new(CountingMessenger::default()),
            events,
        );

        handle.try_enqueue(fx.op("p1", Priority::Poll)).unwrap();
        handle.try_enqueue(fx.op("p2", Priority::Poll)).unwrap();
        wait_for(|| fx.controller.status() == ControllerStatus::Failed).await;

        fx.codec.fail.store(false, Ordering::SeqCst);
        handle.try_enqueue(fx.op("p3", Priority::Poll)).unwrap();
        wait_for(|| handle.stats().cancelled == 1).await;
        assert!(fx.log.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.try_enqueue(fx.op("p4", Priority::Poll)).unwrap();
        wait_for(|| fx.controller.status() == ControllerStatus::Ok).await;
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(*fx.log.lock(), vec!["p4"]);
        assert_eq!(fx.controller.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_queue_full_rejects() {
        let fx = Fixture::new();
        let events = Arc::new(EventDispatcher::new());
        let (_poller, handle) = Poller::new(
            config().with_queue_capacity(1),
            Box::new(CountingMessenger::default()),
            events,
        );
        handle.try_enqueue(fx.op("a", Priority::Poll)).unwrap();
        let err = handle.try_enqueue(fx.op("b", Priority::Poll)).unwrap_err();
        assert!(matches!(err, EnqueueError::Full { .. }));
        assert_eq!(handle.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_backlog_bounded_while_busy() {
        const TAGS: [&str; 6] = ["r0", "r1", "r2", "r3", "r4", "r5"];
        let fx = Fixture::new();
        fx.codec.hold_ms.store(30, Ordering::SeqCst);
        let events = Arc::new(EventDispatcher::new());
        let (handle, task) = Poller::spawn(
            config().with_queue_capacity(3),
            Box::new(CountingMessenger::default()),
            events,
        );

        handle.try_enqueue(fx.op("busy", Priority::Poll)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        handle.try_enqueue(fx.op("a", Priority::Poll)).unwrap();
        handle.try_enqueue(fx.op("b", Priority::Poll)).unwrap();
        let err = handle.try_enqueue(fx.op("c", Priority::Poll)).unwrap_err();
        assert!(matches!(err, EnqueueError::Full { .. }));
        assert_eq!(handle.pending(), 3);

        for _ in 0..10 {
            for tag in TAGS {
                let _ = handle.try_enqueue(fx.op(tag, Priority::Poll));
            }
            assert!(handle.pending() <= 3);
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(handle.pending() <= 3);
        }
        assert!(handle.stats().rejected > 10);

        handle.shutdown();
        task.await.unwrap();
        assert_eq!(handle.pending(), 0);
        let stats = handle.stats();
        assert_eq!(
            stats.accepted,
            stats.succeeded + stats.failed + stats.cancelled
        );
    }

    #[tokio::test]
    async fn test_rejected_op_leaves_state_untouched() {
        let fx = Fixture::new();
        let events = Arc::new(EventDispatcher::new());
        let (poller, handle) = Poller::new(
            config().with_queue_capacity(1),
            Box::new(CountingMessenger::default()),
            events,
        );
        let before = fx.controller.snapshot();

        handle.try_enqueue(fx.op("a", Priority::Poll)).unwrap();
        let err = handle.try_enqueue(fx.op("b", Priority::Command)).unwrap_err();
        assert!(matches!(err, EnqueueError::Full { .. }));

        assert_eq!(fx.cleanups.load(Ordering::SeqCst), 1);
        assert!(fx.controller.devices()[0].state().is_empty());
        let after = fx.controller.snapshot();
        assert_eq!(after.status, before.status);
        assert_eq!(after.consecutive_failures, before.consecutive_failures);
        assert_eq!(after.last_success, before.last_success);

        let task = tokio::spawn(poller.run());
        wait_for(|| handle.stats().succeeded == 1).await;
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(fx.cleanups.load(Ordering::SeqCst), 2);
        assert_eq!(fx.last_published().as_deref(), Some("a"));
    }

    #[test]
    fn test_defer_delay_grows_to_cap() {
        let config = PollerConfig::new("line")
            .with_defer_delay(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(config.defer_delay_for(0), Duration::from_millis(100));
        assert_eq!(config.defer_delay_for(2), Duration::from_millis(400));
        assert_eq!(config.defer_delay_for(10), Duration::from_millis(500));
    }
}
