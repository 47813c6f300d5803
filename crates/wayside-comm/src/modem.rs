// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Dial-up links over a shared modem pool.
//!
//! A [`ModemPool`] owns a fixed set of modems. A [`ModemMessenger`] checks
//! one out for the length of a session, dials the controller, and returns
//! the modem on close. An exhausted pool is not an application error: open
//! fails with `ResourceUnavailable` and the poller re-queues the operation.
//!
//! # Session
//!
//! ```text
//! acquire lease ──▶ open line ──▶ init string / OK ──▶ ATDT<phone> / CONNECT
//!                                                             │
//!        release lease ◀── close line ◀── +++ ATH0 ◀── close()┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use wayside_core::{CommError, CommResult, Messenger, TransportState};

use crate::serial::SerialSettings;
use crate::stream::{self, IoStream};

/// Resource name reported when every modem is checked out.
pub const NO_MODEM: &str = "NO MODEM AVAILABLE";

/// Result codes that end a dial attempt without a connection.
const DIAL_FAILURES: &[&str] = &["NO CARRIER", "BUSY", "NO DIALTONE", "NO DIAL TONE", "NO ANSWER", "ERROR"];

// =============================================================================
// ModemSpec
// =============================================================================

/// One modem of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemSpec {
    /// Modem name.
    pub name: String,
    /// Serial port the modem is attached to.
    pub port: String,
    /// Port baud rate.
    pub baud_rate: u32,
    /// Optional initialisation string sent before dialing (without `\r`).
    pub init_string: Option<String>,
    /// Deadline for the init and dial handshake.
    pub dial_timeout: Duration,
    /// Silence kept around the `+++` escape when hanging up.
    pub guard_time: Duration,
}

impl ModemSpec {
    /// Creates a modem with default timing.
    pub fn new(name: impl Into<String>, port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            port: port.into(),
            baud_rate,
            init_string: None,
            dial_timeout: Duration::from_secs(60),
            guard_time: Duration::from_secs(1),
        }
    }

    /// Sets the init string.
    pub fn with_init_string(mut self, init: impl Into<String>) -> Self {
        self.init_string = Some(init.into());
        self
    }

    /// Sets the dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the hang-up guard time.
    pub fn with_guard_time(mut self, guard: Duration) -> Self {
        self.guard_time = guard;
        self
    }
}

// =============================================================================
// ModemPool
// =============================================================================

/// A fixed set of modems shared by every dial-up link.
pub struct ModemPool {
    modems: Vec<ModemSpec>,
    in_use: Mutex<Vec<bool>>,
}

impl ModemPool {
    /// Creates a pool.
    pub fn new(modems: Vec<ModemSpec>) -> Arc<Self> {
        let in_use = Mutex::new(vec![false; modems.len()]);
        Arc::new(Self { modems, in_use })
    }

    /// Checks out a free modem.
    ///
    /// # Errors
    ///
    /// Returns [`CommError::ResourceUnavailable`] if every modem is in use.
    pub fn acquire(self: &Arc<Self>) -> CommResult<ModemLease> {
        let mut in_use = self.in_use.lock();
        match in_use.iter().position(|busy| !busy) {
            Some(index) => {
                in_use[index] = true;
                tracing::debug!(modem = %self.modems[index].name, "Modem acquired");
                Ok(ModemLease {
                    pool: self.clone(),
                    index,
                })
            }
            None => Err(CommError::resource_unavailable(NO_MODEM)),
        }
    }

    /// Returns the number of free modems.
    pub fn available(&self) -> usize {
        self.in_use.lock().iter().filter(|busy| !**busy).count()
    }

    /// Returns the pool size.
    pub fn size(&self) -> usize {
        self.modems.len()
    }

    fn release(&self, index: usize) {
        if let Some(slot) = self.in_use.lock().get_mut(index) {
            *slot = false;
        }
        tracing::debug!(modem = %self.modems[index].name, "Modem released");
    }
}

impl fmt::Debug for ModemPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModemPool")
            .field("size", &self.size())
            .field("available", &self.available())
            .finish()
    }
}

/// Exclusive use of one modem. Dropping the lease returns it to the pool.
pub struct ModemLease {
    pool: Arc<ModemPool>,
    index: usize,
}

impl ModemLease {
    /// Returns the leased modem.
    pub fn spec(&self) -> &ModemSpec {
        &self.pool.modems[self.index]
    }
}

impl Drop for ModemLease {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

impl fmt::Debug for ModemLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModemLease").field(&self.spec().name).finish()
    }
}

// =============================================================================
// LineConnector
// =============================================================================

/// Opens the physical line of a modem.
#[async_trait]
pub trait LineConnector: Send + Sync {
    /// Opens the line to `modem`.
    async fn connect(&self, modem: &ModemSpec) -> CommResult<Box<dyn IoStream>>;
}

/// Opens modem lines as serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialLineConnector;

#[async_trait]
impl LineConnector for SerialLineConnector {
    async fn connect(&self, modem: &ModemSpec) -> CommResult<Box<dyn IoStream>> {
        let port = SerialSettings::new(&modem.port, modem.baud_rate).open()?;
        Ok(Box::new(port))
    }
}

// =============================================================================
// ModemMessenger
// =============================================================================

/// A dial-up messenger.
pub struct ModemMessenger {
    phone: String,
    pool: Arc<ModemPool>,
    connector: Arc<dyn LineConnector>,
    lease: Option<ModemLease>,
    line: Option<Box<dyn IoStream>>,
    state: TransportState,
    write_timeout: Duration,
}

impl ModemMessenger {
    /// Creates a messenger dialing `phone` through `pool`.
    pub fn new(phone: impl Into<String>, pool: Arc<ModemPool>, connector: Arc<dyn LineConnector>) -> Self {
        Self {
            phone: phone.into(),
            pool,
            connector,
            lease: None,
            line: None,
            state: TransportState::Disconnected,
            write_timeout: Duration::from_secs(5),
        }
    }

    /// Returns the dialed number.
    pub fn phone(&self) -> &str {
        &self.phone
    }

    /// Returns the leased modem, if a session is open.
    pub fn modem(&self) -> Option<&ModemSpec> {
        self.lease.as_ref().map(ModemLease::spec)
    }

    fn line(&mut self) -> CommResult<&mut Box<dyn IoStream>> {
        self.line.as_mut().ok_or(CommError::NotConnected)
    }

    fn mark<T>(&mut self, result: CommResult<T>) -> CommResult<T> {
        if matches!(result, Err(ref e) if e.requires_reconnect()) {
            self.state = TransportState::Error;
        }
        result
    }

    async fn dial(&mut self, modem: &ModemSpec) -> CommResult<()> {
        let deadline = Instant::now() + modem.dial_timeout;
        let write_timeout = self.write_timeout;
        let dial = format!("ATDT{}\r", self.phone);
        let line = self.line()?;
        if let Some(init) = &modem.init_string {
            stream::write_all(line, format!("{}\r", init).as_bytes(), write_timeout).await?;
            await_result(line, "OK", deadline, modem.dial_timeout).await?;
        }
        stream::write_all(line, dial.as_bytes(), write_timeout).await?;
        let connect = await_result(line, "CONNECT", deadline, modem.dial_timeout).await?;
        tracing::debug!(modem = %modem.name, phone = %self.phone, result = %connect, "Modem connected");
        Ok(())
    }

    async fn hang_up(&mut self, guard: Duration) {
        let write_timeout = self.write_timeout;
        let Some(line) = self.line.as_mut() else {
            return;
        };
        tokio::time::sleep(guard).await;
        if stream::write_all(line, b"+++", write_timeout).await.is_ok() {
            tokio::time::sleep(guard).await;
            let _ = stream::write_all(line, b"ATH0\r", write_timeout).await;
        }
    }
}

/// Reads modem result lines until one starts with `expected`.
///
/// Echoed commands and unrelated lines are skipped. A dial failure code
/// ends the wait with a connection error.
async fn await_result(
    line: &mut Box<dyn IoStream>,
    expected: &str,
    deadline: Instant,
    span: Duration,
) -> CommResult<String> {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 128];
    loop {
        while let Some(end) = pending.iter().position(|b| *b == b'\r' || *b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw).trim().to_string();
            if text.is_empty() {
                continue;
            }
            if text.starts_with(expected) {
                return Ok(text);
            }
            if let Some(code) = DIAL_FAILURES.iter().find(|code| text.starts_with(**code)) {
                return Err(CommError::connection_failed(format!("modem: {}", code)));
            }
            tracing::trace!(line = %text, "Ignoring modem output");
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(CommError::timeout(span));
        }
        let n = stream::read_some(line, &mut chunk, left).await?;
        pending.extend_from_slice(&chunk[..n]);
    }
}

impl fmt::Debug for ModemMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModemMessenger")
            .field("phone", &self.phone)
            .field("lease", &self.lease)
            .field("state", &self.state)
            .finish()
    }
}

#[async_trait]
impl Messenger for ModemMessenger {
    fn display_name(&self) -> String {
        format!("modem:{}", self.phone)
    }

    fn state(&self) -> TransportState {
        self.state
    }

    async fn open(&mut self) -> CommResult<()> {
        if self.state == TransportState::Connected {
            return Ok(());
        }
        let lease = self.pool.acquire()?;
        let modem = lease.spec().clone();
        self.lease = Some(lease);
        self.state = TransportState::Connecting;

        let result = match self.connector.connect(&modem).await {
            Ok(line) => {
                self.line = Some(line);
                self.dial(&modem).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.state = TransportState::Connected;
                Ok(())
            }
            Err(e) => {
                tracing::debug!(modem = %modem.name, phone = %self.phone, error = %e, "Dial failed");
                self.line = None;
                self.lease = None;
                self.state = TransportState::Error;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(guard) = self.modem().map(|m| m.guard_time) {
            if self.state == TransportState::Connected {
                self.hang_up(guard).await;
            }
        }
        self.line = None;
        self.lease = None;
        self.state = TransportState::Disconnected;
    }

    async fn write(&mut self, bytes: &[u8]) -> CommResult<()> {
        let deadline = self.write_timeout;
        let result = match self.line() {
            Ok(line) => stream::write_all(line, bytes, deadline).await,
            Err(e) => Err(e),
        };
        self.mark(result)
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> CommResult<usize> {
        let result = match self.line() {
            Ok(line) => stream::read_some(line, buf, timeout).await,
            Err(e) => Err(e),
        };
        self.mark(result)
    }

    async fn discard_input(&mut self) -> CommResult<()> {
        let result = match self.line() {
            Ok(line) => stream::drain(line).await.map(|_| ()),
            Err(e) => Err(e),
        };
        self.mark(result)
    }
}

// =============================================================================
// Tests
// =============================================================================
