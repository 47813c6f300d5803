// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Operations: stateful units of work bound to one controller.
//!
//! Protocol specific behaviour lives in a [`Procedure`]: its phase type, the
//! transition function run for each phase, and the cleanup applied at the
//! end. [`Operation`] is the single generic driver around a procedure. It
//! owns the retry budget, the step cap, the deadlines, cancellation, and the
//! exactly-once cleanup. Pollers see operations through the object safe
//! [`Executable`] trait.
//!
//! # Lifecycle
//!
//! ```text
//! CREATED ──begin()──▶ RUNNING ──step()*──▶ DONE | FAILED | CANCELLED
//!                        ▲   │
//!                        └───┘ retry (budget) / continue (next phase)
//! ```
//!
//! `finish()` runs the procedure's cleanup and records the outcome on the
//! controller. It runs exactly once: explicitly from the poller, or from
//! `Drop` if the operation is discarded unfinished.
//!
//! # Example
//!
//! ```rust,ignore
//! let op = Operation::new(ChangeBeaconState::new(beacon, true), codec, controller);
//! let cancel = op.cancel_token();
//! poller.enqueue(op.boxed())?;
//! ```

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::controller::{Controller, ControllerSnapshot, Device, StatusChange};
use crate::error::{CommError, CommResult};
use crate::messenger::Messenger;
use crate::phase::Transition;
use crate::property::{Codec, CommMessage, MessageContext};
use crate::retry::{ExponentialBackoff, RetryDecision, RetryStrategy};
use crate::types::{ControllerId, DeviceId, DeviceState, OperationState, Outcome, Priority};

// =============================================================================
// Policy
// =============================================================================

/// Default number of phase executions allowed per operation.
pub const DEFAULT_MAX_STEPS: u32 = 64;

/// Default pause between recovery attempts on a failed controller.
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Limits applied to every operation on a link.
#[derive(Debug, Clone)]
pub struct OperationPolicy {
    /// Retry budget and pauses between retried phases.
    pub retry: Arc<dyn RetryStrategy>,
    /// Deadline for reading each response.
    pub read_timeout: Duration,
    /// Deadline for one phase, all of its exchanges included.
    pub phase_timeout: Duration,
    /// Deadline for the whole operation, retries included.
    pub operation_timeout: Duration,
    /// Maximum number of phase executions.
    pub max_steps: u32,
    /// Consecutive failures after which a controller is marked failed.
    pub failure_threshold: u32,
    /// Pause between recovery attempts on a failed controller. `None` leaves
    /// recovery to commands.
    pub recovery_interval: Option<Duration>,
}

impl Default for OperationPolicy {
    fn default() -> Self {
        Self {
            retry: Arc::new(ExponentialBackoff::default()),
            read_timeout: Duration::from_secs(2),
            phase_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(60),
            max_steps: DEFAULT_MAX_STEPS,
            failure_threshold: 3,
            recovery_interval: Some(DEFAULT_RECOVERY_INTERVAL),
        }
    }
}

impl OperationPolicy {
    /// Creates a policy with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry strategy.
    pub fn with_retry(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the response read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the per-phase deadline.
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Sets the per-operation deadline.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Sets the step cap.
    pub fn with_max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps.max(1);
        self
    }

    /// Sets the controller failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the pause between recovery attempts.
    pub fn with_recovery_interval(mut self, interval: Option<Duration>) -> Self {
        self.recovery_interval = interval;
        self
    }
}

// =============================================================================
// Identity & cancellation
// =============================================================================

/// Identity used to merge duplicate queued operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpIdentity {
    /// Procedure name.
    pub kind: String,
    /// Target controller.
    pub controller: ControllerId,
    /// Procedure parameters, rendered as a string.
    pub params: String,
}

impl fmt::Display for OpIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}@{}", self.kind, self.controller)
        } else {
            write!(f, "{}@{}({})", self.kind, self.controller, self.params)
        }
    }
}

/// Shared flag used by an operation's owner to cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the operation cancelled. Takes effect at the next phase boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Cleanup & completion
// =============================================================================

/// Context handed to [`Procedure::cleanup`].
pub struct CleanupContext<'a> {
    outcome: Outcome,
    error: Option<&'a CommError>,
    controller: &'a Arc<Controller>,
    published: Vec<(DeviceId, Arc<DeviceState>)>,
}

impl<'a> CleanupContext<'a> {
    fn new(outcome: Outcome, error: Option<&'a CommError>, controller: &'a Arc<Controller>) -> Self {
        Self {
            outcome,
            error,
            controller,
            published: Vec::new(),
        }
    }

    /// Returns the final outcome.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Returns `true` if the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Returns the error that ended the operation, if any.
    pub fn error(&self) -> Option<&CommError> {
        self.error
    }

    /// Returns the target controller.
    pub fn controller(&self) -> &Arc<Controller> {
        self.controller
    }

    /// Replaces a device's state snapshot and reports it to observers.
    ///
    /// A cancelled operation leaves device state untouched. It may finish
    /// outside the poller, for example when a full queue rejects it.
    pub fn publish(&mut self, device: &Device, state: DeviceState) {
        if self.outcome == Outcome::Cancelled {
            tracing::trace!(device = %device.id(), "Cancelled operation did not publish state");
            return;
        }
        let state = device.replace_state(state);
        self.published.push((device.id().clone(), state));
    }
}

/// Summary of a finished operation, delivered to observers.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    /// Operation ID.
    pub operation_id: Uuid,
    /// Procedure name.
    pub name: String,
    /// Priority the operation ran at.
    pub priority: Priority,
    /// Final outcome.
    pub outcome: Outcome,
    /// Error that ended the operation.
    pub error: Option<CommError>,
    /// Why the operation was cancelled, when it was.
    pub note: Option<String>,
    /// Phase executions performed.
    pub steps: u32,
    /// Retry budget spent.
    pub retries: u32,
    /// Controller health after the outcome was recorded.
    pub controller: ControllerSnapshot,
    /// Status change caused by this outcome.
    pub status_change: Option<StatusChange>,
    /// Device states published by the cleanup.
    pub device_states: Vec<(DeviceId, Arc<DeviceState>)>,
    /// Time the operation was created.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Procedure
// =============================================================================

/// Protocol specific behaviour of an operation.
#[async_trait]
pub trait Procedure: Send + Sync + 'static {
    /// Codec used for every exchange.
    type Codec: Codec;

    /// Phase values. Each carries the data its exchange needs.
    type Phase: Send + Sync + fmt::Debug + 'static;

    /// Returns the procedure name.
    fn name(&self) -> &'static str;

    /// Returns the scheduling priority.
    fn priority(&self) -> Priority;

    /// Returns the parameters that distinguish two requests of this kind.
    fn params(&self) -> String {
        String::new()
    }

    /// Returns the first phase.
    fn begin(&mut self) -> Self::Phase;

    /// Runs one phase.
    async fn step(
        &mut self,
        phase: &mut Self::Phase,
        mess: &mut CommMessage<'_, Self::Codec>,
    ) -> CommResult<Transition<Self::Phase>>;

    /// Applies final device state updates. Runs exactly once.
    fn cleanup(&mut self, ctx: &mut CleanupContext<'_>) {
        let _ = ctx;
    }
}

// =============================================================================
// Executable
// =============================================================================

/// Result of one [`Executable::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The next phase is installed.
    Continue,
    /// The same phase runs again after `delay`.
    Retry {
        /// Pause before the retry.
        delay: Duration,
        /// Whether the messenger must be reopened first.
        reconnect: bool,
    },
    /// The operation reached a terminal outcome. Call `finish`.
    Finished(Outcome),
    /// A shared resource was unavailable. Re-queue without spending budget.
    Deferred,
}

/// Object safe view of an operation used by pollers.
#[async_trait]
pub trait Executable: Send {
    /// Returns the operation ID.
    fn id(&self) -> Uuid;

    /// Returns the procedure name.
    fn name(&self) -> &str;

    /// Returns the scheduling priority.
    fn priority(&self) -> Priority;

    /// Returns the de-duplication identity.
    fn identity(&self) -> &OpIdentity;

    /// Returns the target controller.
    fn controller(&self) -> &Arc<Controller>;

    /// Returns the lifecycle state.
    fn state(&self) -> OperationState;

    /// Returns the cancellation token.
    fn cancel_token(&self) -> CancelToken;

    /// Returns `true` if the owner cancelled or the controller was disabled.
    fn is_cancelled(&self) -> bool;

    /// Installs the first phase. Does nothing if already begun.
    fn begin(&mut self, policy: &OperationPolicy);

    /// Runs the current phase over `messenger`.
    async fn step(&mut self, messenger: &mut dyn Messenger) -> StepOutcome;

    /// Handles a failure to open the messenger before the current phase.
    ///
    /// Transport errors spend retry budget like a failed exchange.
    /// `ResourceUnavailable` defers the operation.
    fn open_failed(&mut self, error: CommError) -> StepOutcome;

    /// Runs cleanup and records the outcome. Returns `None` if already finished.
    fn finish(&mut self, outcome: Outcome, note: Option<String>) -> Option<CompletionReport>;
}

impl fmt::Debug for dyn Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("id", &self.id())
            .field("identity", self.identity())
            .field("priority", &self.priority())
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Operation
// =============================================================================

/// The generic operation driver.
pub struct Operation<P: Procedure> {
    id: Uuid,
    procedure: P,
    codec: Arc<P::Codec>,
    controller: Arc<Controller>,
    identity: OpIdentity,
    priority: Priority,
    state: OperationState,
    phase: Option<P::Phase>,
    policy: OperationPolicy,
    retries: u32,
    steps: u32,
    last_error: Option<CommError>,
    cancel: CancelToken,
    created_at: DateTime<Utc>,
    started: Option<Instant>,
    finished: bool,
}

impl<P: Procedure> Operation<P> {
    /// Creates an operation targeting `controller`.
    pub fn new(procedure: P, codec: Arc<P::Codec>, controller: Arc<Controller>) -> Self {
        let identity = OpIdentity {
            kind: procedure.name().to_string(),
            controller: controller.id().clone(),
            params: procedure.params(),
        };
        let priority = procedure.priority();
        Self {
            id: Uuid::new_v4(),
            procedure,
            codec,
            controller,
            identity,
            priority,
            state: OperationState::Created,
            phase: None,
            policy: OperationPolicy::default(),
            retries: 0,
            steps: 0,
            last_error: None,
            cancel: CancelToken::new(),
            created_at: Utc::now(),
            started: None,
            finished: false,
        }
    }

    /// Overrides the procedure's priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the procedure.
    pub fn procedure(&self) -> &P {
        &self.procedure
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Option<&P::Phase> {
        self.phase.as_ref()
    }

    /// Returns the retry budget spent so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Returns the number of phase executions so far.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Boxes the operation for a poller queue.
    pub fn boxed(self) -> Box<dyn Executable> {
        Box::new(self)
    }

    fn fail(&mut self, error: CommError) -> StepOutcome {
        tracing::debug!(
            op_id = %self.id,
            operation = self.procedure.name(),
            controller = %self.controller.id(),
            error = %error,
            "Operation failed"
        );
        self.last_error = Some(error);
        self.phase = None;
        StepOutcome::Finished(Outcome::Failed)
    }

    fn on_error(&mut self, phase: P::Phase, error: CommError) -> StepOutcome {
        if error.is_resource_unavailable() {
            self.phase = Some(phase);
            self.started = None;
            return StepOutcome::Deferred;
        }
        let decision = self.policy.retry.should_retry(&error, self.retries + 1);
        self.retry(phase, decision, error)
    }

    fn retry(&mut self, phase: P::Phase, decision: RetryDecision, error: CommError) -> StepOutcome {
        match decision {
            RetryDecision::Retry(delay) => {
                self.retries += 1;
                tracing::debug!(
                    op_id = %self.id,
                    operation = self.procedure.name(),
                    strategy = self.policy.retry.name(),
                    retry = self.retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying phase"
                );
                let reconnect = error.requires_reconnect();
                self.last_error = Some(error);
                self.phase = Some(phase);
                StepOutcome::Retry { delay, reconnect }
            }
            RetryDecision::DoNotRetry => self.fail(error),
        }
    }
}

#[async_trait]
impl<P: Procedure> Executable for Operation<P> {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        self.procedure.name()
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn identity(&self) -> &OpIdentity {
        &self.identity
    }

    fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.controller.is_disabled()
    }

    fn begin(&mut self, policy: &OperationPolicy) {
        if self.state != OperationState::Created {
            return;
        }
        self.policy = policy.clone();
        self.phase = Some(self.procedure.begin());
        self.state = OperationState::Running;
    }

    async fn step(&mut self, messenger: &mut dyn Messenger) -> StepOutcome {
        let Some(mut phase) = self.phase.take() else {
            return StepOutcome::Finished(Outcome::Success);
        };
        if self.steps >= self.policy.max_steps {
            return self.fail(CommError::aborted("STEP LIMIT"));
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let elapsed = started.elapsed();
        if elapsed >= self.policy.operation_timeout {
            return self.fail(CommError::timeout(self.policy.operation_timeout));
        }
        let budget = self
            .policy
            .phase_timeout
            .min(self.policy.operation_timeout - elapsed);
        self.steps += 1;

        let codec = self.codec.clone();
        let ctx = MessageContext::new(self.controller.drop_address(), self.policy.read_timeout);
        let caught = {
            let mut mess = CommMessage::new(&*codec, messenger, ctx);
            let exchange = tokio::time::timeout(budget, self.procedure.step(&mut phase, &mut mess));
            CatchUnwind::new(exchange).await
        };
        let result = match caught {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CommError::timeout(budget)),
            Err(panic) => {
                tracing::error!(
                    op_id = %self.id,
                    operation = self.procedure.name(),
                    panic = %panic,
                    "Phase panicked"
                );
                return self.fail(CommError::aborted(format!("panic: {}", panic)));
            }
        };

        match result {
            Ok(Transition::Continue(next)) => {
                self.phase = Some(next);
                StepOutcome::Continue
            }
            Ok(Transition::Done) => StepOutcome::Finished(Outcome::Success),
            Ok(Transition::Retry) => {
                let decision = self.policy.retry.should_repeat(self.retries + 1);
                self.retry(phase, decision, CommError::aborted("RETRY LIMIT"))
            }
            Ok(Transition::Fail(reason)) => self.fail(CommError::aborted(reason)),
            Err(error) => self.on_error(phase, error),
        }
    }

    fn open_failed(&mut self, error: CommError) -> StepOutcome {
        match self.phase.take() {
            Some(phase) => self.on_error(phase, error),
            None => self.fail(error),
        }
    }

    fn finish(&mut self, outcome: Outcome, note: Option<String>) -> Option<CompletionReport> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.phase = None;
        self.state = match outcome {
            Outcome::Success => OperationState::Done,
            Outcome::Failed => OperationState::Failed,
            Outcome::Cancelled => OperationState::Cancelled,
        };

        let error = match outcome {
            Outcome::Success | Outcome::Cancelled => None,
            Outcome::Failed => Some(
                self.last_error
                    .clone()
                    .unwrap_or_else(|| CommError::aborted(note.clone().unwrap_or_default())),
            ),
        };

        let mut ctx = CleanupContext::new(outcome, error.as_ref(), &self.controller);
        self.procedure.cleanup(&mut ctx);
        let device_states = ctx.published;

        let status_change = match (&outcome, &error) {
            (Outcome::Success, _) => self.controller.record_success(),
            (Outcome::Failed, Some(error)) => self
                .controller
                .record_failure(error, self.policy.failure_threshold),
            _ => None,
        };

        Some(CompletionReport {
            operation_id: self.id,
            name: self.procedure.name().to_string(),
            priority: self.priority,
            outcome,
            error,
            note,
            steps: self.steps,
            retries: self.retries,
            controller: self.controller.snapshot(),
            status_change,
            device_states,
            created_at: self.created_at,
        })
    }
}

impl<P: Procedure> Drop for Operation<P> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let outcome = match self.state {
            OperationState::Created => Outcome::Cancelled,
            _ => Outcome::Failed,
        };
        tracing::warn!(
            op_id = %self.id,
            operation = self.procedure.name(),
            controller = %self.controller.id(),
            outcome = %outcome,
            "Operation dropped before finishing"
        );
        let _ = self.finish(outcome, Some("aborted".to_string()));
    }
}

impl<P: Procedure> fmt::Debug for Operation<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("phase", &self.phase)
            .field("retries", &self.retries)
            .field("steps", &self.steps)
            .finish()
    }
}

// =============================================================================
// Panic containment
// =============================================================================

/// Resolves to `Err(message)` if the inner future panics while polled.
struct CatchUnwind<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> CatchUnwind<F> {
    fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, String>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.get_mut().inner.as_mut();
        match std::panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
