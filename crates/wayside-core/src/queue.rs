// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The per-link operation queue.
//!
//! Entries live in a plain `Vec`. `pop_ready` scans it for the best ready
//! entry: highest effective priority, ties broken by arrival order. Link
//! queues stay short, bounded by the poller's capacity, so the scan is
//! cheap. Deferred entries keep their original sequence number but are not
//! ready before their `not_before` instant. The queue is owned by a single
//! poller task and is not shared.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::operation::Executable;
use crate::types::Priority;

// =============================================================================
// FairnessPolicy
// =============================================================================

/// How queued operations of different priorities are interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FairnessPolicy {
    /// The highest priority always runs first.
    #[default]
    Strict,
    /// A waiting operation rises one tier per `interval`, never reaching
    /// command rank.
    Aging {
        /// Wait time per tier.
        #[serde(with = "crate::retry::duration_millis")]
        interval: Duration,
    },
}

impl FairnessPolicy {
    /// Returns the rank an operation has after waiting `waited`.
    pub fn effective_rank(&self, priority: Priority, waited: Duration) -> u8 {
        let rank = priority.rank();
        match self {
            Self::Strict => rank,
            Self::Aging { interval } => {
                if priority.is_command() || interval.is_zero() {
                    return rank;
                }
                let tiers = (waited.as_millis() / interval.as_millis()).min(u8::MAX as u128) as u8;
                rank.saturating_add(tiers).min(Priority::Command.rank() - 1)
            }
        }
    }
}

impl fmt::Display for FairnessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Aging { interval } => write!(f, "aging({:?})", interval),
        }
    }
}

// =============================================================================
// Entry
// =============================================================================

/// A queued operation and its scheduling metadata.
pub struct QueueEntry {
    /// The operation.
    pub op: Box<dyn Executable>,
    seq: u64,
    enqueued: Instant,
    not_before: Option<Instant>,
    /// Number of times the operation has been deferred.
    pub deferrals: u32,
}

impl QueueEntry {
    fn is_ready(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|t| t <= now)
    }
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("identity", self.op.identity())
            .field("priority", &self.op.priority())
            .field("seq", &self.seq)
            .field("deferrals", &self.deferrals)
            .finish()
    }
}

// =============================================================================
// OperationQueue
// =============================================================================

/// Priority queue of pending operations for one link.
#[derive(Debug, Default)]
pub struct OperationQueue {
    entries: Vec<QueueEntry>,
    next_seq: u64,
    fairness: FairnessPolicy,
}

impl OperationQueue {
    /// Creates an empty queue.
    pub fn new(fairness: FairnessPolicy) -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
            fairness,
        }
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the fairness policy.
    pub fn fairness(&self) -> FairnessPolicy {
        self.fairness
    }

    /// Adds an operation that arrives now.
    ///
    /// If an operation with the same identity is already pending, the new
    /// one is handed back as a duplicate.
    pub fn push(&mut self, op: Box<dyn Executable>) -> Result<(), Box<dyn Executable>> {
        self.push_at(op, Instant::now())
    }

    /// Adds an operation that was offered at `arrived`.
    ///
    /// Aging counts from `arrived`, so time spent waiting in a poller's
    /// inbox is credited.
    pub fn push_at(
        &mut self,
        op: Box<dyn Executable>,
        arrived: Instant,
    ) -> Result<(), Box<dyn Executable>> {
        if self.contains(op.as_ref()) {
            return Err(op);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueueEntry {
            op,
            seq,
            enqueued: arrived,
            not_before: None,
            deferrals: 0,
        });
        Ok(())
    }

    /// Puts a deferred entry back, not ready before `not_before`.
    ///
    /// The entry keeps its place in FIFO order.
    pub fn defer(&mut self, mut entry: QueueEntry, not_before: Instant) {
        entry.deferrals = entry.deferrals.saturating_add(1);
        entry.not_before = Some(not_before);
        self.entries.push(entry);
    }

    /// Returns `true` if an operation with the same identity is pending.
    pub fn contains(&self, op: &dyn Executable) -> bool {
        self.entries
            .iter()
            .any(|e| e.op.identity() == op.identity())
    }

    /// Removes and returns the best ready entry.
    pub fn pop_ready(&mut self, now: Instant) -> Option<QueueEntry> {
        let fairness = self.fairness;
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_ready(now))
            .max_by(|(_, a), (_, b)| {
                let rank_a = fairness.effective_rank(a.op.priority(), now.saturating_duration_since(a.enqueued));
                let rank_b = fairness.effective_rank(b.op.priority(), now.saturating_duration_since(b.enqueued));
                rank_a
                    .cmp(&rank_b)
                    .then_with(|| b.enqueued.cmp(&a.enqueued))
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i)?;
        Some(self.entries.swap_remove(index))
    }

    /// Returns the earliest instant at which a deferred entry becomes ready.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.entries.iter().filter_map(|e| e.not_before).min()
    }

    /// Returns `true` if some entry is ready at `now`.
    pub fn has_ready(&self, now: Instant) -> bool {
        self.entries.iter().any(|e| e.is_ready(now))
    }

    /// Removes every entry matching `predicate`.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<QueueEntry>
    where
        F: FnMut(&dyn Executable) -> bool,
    {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if predicate(self.entries[i].op.as_ref()) {
                removed.push(self.entries.remove(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Removes every entry.
    pub fn drain(&mut self) -> Vec<QueueEntry> {
        std::mem::take(&mut self.entries)
    }
}

// =============================================================================
// Tests
// =============================================================================
