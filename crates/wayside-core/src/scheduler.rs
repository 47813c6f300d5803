// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Timer-driven producers of recurring operations.
//!
//! Each [`Job`] fires on a [`Cadence`]: a period plus an offset into it,
//! aligned to wall-clock time ("every 30s at :13"). Offsets spread the load
//! of many timers. Jobs run synchronously on their timer task and must not
//! block: [`PollJob`] only ever calls `try_enqueue`, so a slow link cannot
//! stall its timer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::controller::Controller;
use crate::operation::Executable;
use crate::poller::PollerHandle;

// =============================================================================
// Cadence
// =============================================================================

/// A fixed period with a phase offset, aligned to the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    period: Duration,
    offset: Duration,
}

impl Cadence {
    /// Creates a cadence. The offset is reduced modulo the period.
    pub fn new(period: Duration, offset: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let offset_ms = offset.as_millis() % period.as_millis();
        Self {
            period,
            offset: Duration::from_millis(offset_ms as u64),
        }
    }

    /// Creates a cadence from whole seconds.
    pub fn every_secs(period: u64, offset: u64) -> Self {
        Self::new(Duration::from_secs(period), Duration::from_secs(offset))
    }

    /// Returns the period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns the offset.
    pub fn offset(&self) -> Duration {
        self.offset
    }

    /// Returns the wait from `now` (time since the epoch) to the next firing.
    ///
    /// Firing instants are `k * period + offset`. A `now` exactly on one of
    /// them fires immediately.
    pub fn delay_from(&self, now: Duration) -> Duration {
        let period = self.period.as_millis() as i128;
        let phase = (now.as_millis() as i128 - self.offset.as_millis() as i128).rem_euclid(period);
        if phase == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis((period - phase) as u64)
        }
    }

    /// Returns the wait until the next firing from the current wall clock.
    pub fn next_delay(&self) -> Duration {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.delay_from(Duration::from_millis(now))
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every {:?} at +{:?}", self.period, self.offset)
    }
}

// =============================================================================
// Job
// =============================================================================

/// What one firing of a job achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Operations accepted by pollers.
    pub enqueued: usize,
    /// Operations rejected (queue full or poller closed).
    pub rejected: usize,
}

/// A recurring unit of work.
pub trait Job: Send + Sync {
    /// Returns the job name for logging.
    fn name(&self) -> &str;

    /// Runs one firing. Must not block.
    fn perform(&self) -> JobReport;
}

/// Builds the periodic poll operations for a controller.
pub trait PollSource: Send + Sync {
    /// Returns one poll operation per eligible device of `controller`.
    fn poll_operations(&self, controller: &Arc<Controller>) -> Vec<Box<dyn Executable>>;
}

/// Enqueues the periodic polls of one link.
pub struct PollJob {
    name: String,
    handle: PollerHandle,
    controllers: Vec<Arc<Controller>>,
    source: Arc<dyn PollSource>,
}

impl PollJob {
    /// Creates a poll job for the controllers of one link.
    pub fn new(
        handle: PollerHandle,
        controllers: Vec<Arc<Controller>>,
        source: Arc<dyn PollSource>,
    ) -> Self {
        Self {
            name: format!("poll:{}", handle.link()),
            handle,
            controllers,
            source,
        }
    }
}

impl Job for PollJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn perform(&self) -> JobReport {
        let mut report = JobReport::default();
        for controller in &self.controllers {
            if controller.is_disabled() {
                continue;
            }
            for op in self.source.poll_operations(controller) {
                match self.handle.try_enqueue(op) {
                    Ok(()) => report.enqueued += 1,
                    Err(e) => {
                        report.rejected += 1;
                        tracing::debug!(job = %self.name, error = %e, "Poll not enqueued");
                    }
                }
            }
        }
        report
    }
}

impl fmt::Debug for PollJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollJob")
            .field("name", &self.name)
            .field("controllers", &self.controllers.len())
            .finish()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

struct ScheduledJob {
    cadence: Cadence,
    job: Arc<dyn Job>,
}

/// Runs jobs on their cadences until shut down.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job.
    pub fn add(&mut self, cadence: Cadence, job: Arc<dyn Job>) {
        tracing::debug!(job = job.name(), cadence = %cadence, "Job scheduled");
        self.jobs.push(ScheduledJob { cadence, job });
    }

    /// Returns the number of jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns `true` if no jobs were added.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Spawns one timer task per job.
    pub fn start(self) -> SchedulerHandle {
        let (tx, rx) = watch::channel(false);
        let firings = Arc::new(AtomicU64::new(0));
        let tasks: Vec<_> = self
            .jobs
            .into_iter()
            .map(|scheduled| {
                let rx = rx.clone();
                let firings = firings.clone();
                let delay = scheduled.cadence.next_delay();
                tokio::spawn(run_job(scheduled, delay, rx, firings))
            })
            .collect();
        tracing::info!(jobs = tasks.len(), "Scheduler started");
        SchedulerHandle {
            shutdown: tx,
            tasks,
            firings,
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.jobs.iter().map(|j| j.job.name().to_string()).collect();
        f.debug_struct("Scheduler").field("jobs", &names).finish()
    }
}

async fn run_job(
    scheduled: ScheduledJob,
    first_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
    firings: Arc<AtomicU64>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + first_delay, scheduled.cadence.period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = scheduled.job.perform();
                firings.fetch_add(1, Ordering::Relaxed);
                if report.rejected > 0 {
                    tracing::warn!(
                        job = scheduled.job.name(),
                        enqueued = report.enqueued,
                        rejected = report.rejected,
                        "Job could not enqueue all operations"
                    );
                } else {
                    tracing::trace!(job = scheduled.job.name(), enqueued = report.enqueued, "Job fired");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!(job = scheduled.job.name(), "Job stopped");
}

/// Controls a started scheduler.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    firings: Arc<AtomicU64>,
}

impl SchedulerHandle {
    /// Returns the total number of job firings.
    pub fn firings(&self) -> u64 {
        self.firings.load(Ordering::Relaxed)
    }

    /// Stops every timer and waits for the tasks to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Scheduler task failed");
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("tasks", &self.tasks.len())
            .field("firings", &self.firings())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
