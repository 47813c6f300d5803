// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Duplex byte-stream abstraction over one comm link transport.
//!
//! A [`Messenger`] wraps a serial port, a TCP socket, or a dial-up modem
//! line. The poller of a link owns exactly one messenger and is the only
//! task that touches it, so implementations take `&mut self` and need no
//! internal locking.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──open()──▶ Connecting ──▶ Connected ──close()──▶ Disconnected
//!                              │                │
//!                              └──── error ─────┴──▶ Error ──close()──▶ Disconnected
//! ```
//!
//! `close()` is infallible and idempotent. It must release any shared
//! resource (such as a modem line) so that other links can use it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{CommError, CommResult};

// =============================================================================
// TransportState
// =============================================================================

/// Connection state of a messenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connection (or dial) in progress.
    Connecting,
    /// Connected and usable.
    Connected,
    /// The last exchange failed. The messenger must be closed and reopened.
    Error,
}

impl TransportState {
    /// Returns `true` if the messenger is usable.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Messenger Trait
// =============================================================================

/// A duplex byte stream with scoped open/close and per-call deadlines.
///
/// # Implementors
///
/// - `TcpMessenger`: TCP socket
/// - `SerialMessenger`: serial port
/// - `ModemMessenger`: dial-up line checked out of a shared modem pool
#[async_trait]
pub trait Messenger: Send {
    /// Returns a human readable transport description for logs.
    fn display_name(&self) -> String;

    /// Returns the current state.
    fn state(&self) -> TransportState;

    /// Returns `true` if the messenger is open.
    fn is_open(&self) -> bool {
        self.state().is_connected()
    }

    /// Acquires the transport.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the endpoint is unreachable, or
    /// [`CommError::ResourceUnavailable`] if a shared line could not be
    /// checked out.
    async fn open(&mut self) -> CommResult<()>;

    /// Releases the transport and any shared resource held by it.
    async fn close(&mut self);

    /// Writes all bytes.
    async fn write(&mut self, bytes: &[u8]) -> CommResult<()>;

    /// Reads at least one byte into `buf`, waiting at most `timeout`.
    ///
    /// Returns the number of bytes read. End of stream is a read failure.
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> CommResult<usize>;

    /// Discards any stale input before a new request is written.
    async fn discard_input(&mut self) -> CommResult<()> {
        Ok(())
    }
}

// =============================================================================
// Read helpers
// =============================================================================

fn remaining(deadline: Instant, timeout: Duration) -> CommResult<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(CommError::timeout(timeout))
    } else {
        Ok(left)
    }
}

/// Reads exactly `len` bytes within `timeout`.
pub async fn read_exact<M>(messenger: &mut M, len: usize, timeout: Duration) -> CommResult<Vec<u8>>
where
    M: Messenger + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let left = remaining(deadline, timeout)?;
        let n = messenger.read(&mut out[filled..], left).await?;
        filled += n;
    }
    Ok(out)
}

/// Reads until `terminator` has been received, within `timeout`.
///
/// The returned bytes include the terminator. Bytes received after it in
/// the same chunk are discarded. Responses longer than `max_len` fail with a
/// protocol error.
pub async fn read_until<M>(
    messenger: &mut M,
    terminator: &[u8],
    max_len: usize,
    timeout: Duration,
) -> CommResult<Vec<u8>>
where
    M: Messenger + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut out = Vec::with_capacity(64);
    let mut chunk = [0u8; 256];
    loop {
        let left = remaining(deadline, timeout)?;
        let n = messenger.read(&mut chunk, left).await?;
        let scan_from = out.len().saturating_sub(terminator.len().saturating_sub(1));
        out.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&out[scan_from..], terminator) {
            let end = scan_from + pos + terminator.len();
            if end < out.len() {
                tracing::trace!(
                    messenger = %messenger.display_name(),
                    discarded = out.len() - end,
                    "Discarding bytes after terminator"
                );
            }
            out.truncate(end);
            return Ok(out);
        }
        if out.len() > max_len {
            return Err(CommError::protocol_detail("RESPONSE TOO LONG", out.len()));
        }
    }
}

/// Returns the offset of the first occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// =============================================================================
// Tests
// =============================================================================
