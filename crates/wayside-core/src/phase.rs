// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Phase transitions.
//!
//! A phase is a plain value (usually an enum variant) carrying only the data
//! its exchange needs. After each exchange the procedure returns a
//! [`Transition`] telling the engine what happens next.

use std::time::Duration;

use tokio::time::Instant;

/// What an operation does after a phase has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<P> {
    /// Install the next phase.
    Continue(P),
    /// Every phase is complete.
    Done,
    /// Repeat the current phase, spending one unit of the retry budget.
    Retry,
    /// Give up with a reason.
    Fail(String),
}

impl<P> Transition<P> {
    /// Creates a failure transition.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail(reason.into())
    }

    /// Returns `true` for a terminal transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Fail(_))
    }
}

/// A point in time after which a repeating phase gives up.
///
/// Phases that wait for the controller to finish something (a self test, a
/// relay settling) keep a deadline and return themselves until the condition
/// is met or the deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires: Instant,
    span: Duration,
}

impl Deadline {
    /// Creates a deadline `span` from now.
    pub fn after(span: Duration) -> Self {
        Self {
            expires: Instant::now() + span,
            span,
        }
    }

    /// Returns `true` once the deadline has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.expires
    }

    /// Returns the time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires.saturating_duration_since(Instant::now())
    }

    /// Returns the configured span.
    pub fn span(&self) -> Duration {
        self.span
    }
}
