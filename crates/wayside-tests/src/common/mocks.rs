// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! Messengers, codecs and procedures for driving pollers without hardware.
//!
//! Every mock hands out shared records so a test can keep observing it after
//! the mock itself has been boxed and moved into a poller.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use wayside_comm::{IoStream, LineConnector, ModemSpec};
use wayside_core::messenger::read_exact;
use wayside_core::{
    CleanupContext, CommError, CommMessage, CommResult, Codec, Controller, Device, DeviceState,
    Executable, MessageContext, Messenger, Operation, Priority, Procedure, Property, RequestKind,
    Transition, TransportState,
};

// =============================================================================
// ScriptedMessenger
// =============================================================================

/// What a [`ScriptedMessenger`] did, shared with the test.
#[derive(Debug, Default)]
pub struct MessengerRecord {
    /// Every write, in order.
    pub written: Mutex<Vec<Vec<u8>>>,
    /// Successful opens.
    pub opens: AtomicU64,
    /// Closes of an open session.
    pub closes: AtomicU64,
}

impl MessengerRecord {
    /// Returns the number of sessions opened.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Returns the number of sessions closed.
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Returns a copy of the writes.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }
}

/// Answers each write with the next scripted reply.
///
/// Replies arrive in chunks of at most `chunk` bytes. A write with no reply
/// left reads as a timeout. `fail_open` makes every open fail with the
/// given error.
#[derive(Debug)]
pub struct ScriptedMessenger {
    replies: VecDeque<Vec<u8>>,
    pending: VecDeque<u8>,
    chunk: usize,
    open: bool,
    fail_open: Option<CommError>,
    record: Arc<MessengerRecord>,
}

impl ScriptedMessenger {
    /// Creates a messenger that answers with `replies`.
    pub fn new(replies: Vec<Vec<u8>>) -> Self {
        Self {
            replies: replies.into(),
            pending: VecDeque::new(),
            chunk: 5,
            open: false,
            fail_open: None,
            record: Arc::new(MessengerRecord::default()),
        }
    }

    /// Creates a messenger that never answers.
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    /// Makes every open fail with `error`.
    pub fn with_open_failure(mut self, error: CommError) -> Self {
        self.fail_open = Some(error);
        self
    }

    /// Sets the largest chunk a read returns.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Returns the shared record.
    pub fn record(&self) -> Arc<MessengerRecord> {
        self.record.clone()
    }
}

#[async_trait]
impl Messenger for ScriptedMessenger {
    fn display_name(&self) -> String {
        "scripted".to_string()
    }

    fn state(&self) -> TransportState {
        if self.open {
            TransportState::Connected
        } else {
            TransportState::Disconnected
        }
    }

    async fn open(&mut self) -> CommResult<()> {
        if let Some(error) = &self.fail_open {
            return Err(error.clone());
        }
        self.open = true;
        self.record.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.record.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.open = false;
        self.pending.clear();
    }

    async fn write(&mut self, bytes: &[u8]) -> CommResult<()> {
        if !self.open {
            return Err(CommError::NotConnected);
        }
        self.record.written.lock().push(bytes.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.pending.extend(reply);
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> CommResult<usize> {
        if self.pending.is_empty() {
            return Err(CommError::timeout(timeout));
        }
        let n = buf.len().min(self.chunk).min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

// =============================================================================
// FaultCodec
// =============================================================================

/// An empty property for [`FaultCodec`] exchanges.
#[derive(Debug, Clone, Default)]
pub struct Ping;

impl Property for Ping {}

/// Error a [`FaultCodec`] injects into every exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    /// Exchanges succeed.
    #[default]
    None,
    /// Read timeouts.
    Transport,
    /// Malformed responses.
    Protocol,
    /// The controller answers with an error code.
    Controller,
}

/// A codec whose exchanges fail on demand.
///
/// In echo mode each exchange writes a short frame and expects it back,
/// so it runs over real byte streams such as a modem line.
#[derive(Debug, Default)]
pub struct FaultCodec {
    fault: Mutex<Fault>,
    echo: bool,
    exchanges: AtomicU64,
}

impl FaultCodec {
    /// Creates a codec that performs no I/O.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a codec that expects every request echoed back.
    pub fn echo() -> Arc<Self> {
        Arc::new(Self {
            echo: true,
            ..Self::default()
        })
    }

    /// Sets the fault injected from now on.
    pub fn set_fault(&self, fault: Fault) {
        *self.fault.lock() = fault;
    }

    /// Returns the number of exchanges attempted.
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Codec for FaultCodec {
    type Property = Ping;

    fn name(&self) -> &'static str {
        "fault"
    }

    async fn exchange(
        &self,
        messenger: &mut dyn Messenger,
        ctx: &MessageContext,
        _kind: RequestKind,
        _props: &mut [Ping],
    ) -> CommResult<()> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let fault = *self.fault.lock();
        match fault {
            Fault::None => {}
            Fault::Transport => return Err(CommError::timeout(ctx.read_timeout)),
            Fault::Protocol => return Err(CommError::protocol("CHECKSUM")),
            Fault::Controller => return Err(CommError::controller_code(7, "busy")),
        }
        if self.echo {
            let frame = [0x02, ctx.drop_address as u8, 0x03];
            messenger.write(&frame).await?;
            let reply = read_exact(messenger, frame.len(), ctx.read_timeout).await?;
            if reply != frame {
                return Err(CommError::protocol("ECHO"));
            }
        }
        Ok(())
    }
}

// =============================================================================
// ScriptedProcedure
// =============================================================================

/// What scripted procedures did, shared with the test.
#[derive(Debug, Default)]
pub struct ProcedureLog {
    /// Tags of completed procedures, in completion order.
    pub completed: Mutex<Vec<String>>,
    /// Phase executions, tagged.
    pub steps: Mutex<Vec<String>>,
    /// Cleanup calls.
    pub cleanups: AtomicU32,
}

impl ProcedureLog {
    /// Creates an empty log.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the completion order.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    /// Returns the phase executions.
    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().clone()
    }

    /// Returns the number of cleanup calls.
    pub fn cleanups(&self) -> u32 {
        self.cleanups.load(Ordering::SeqCst)
    }
}

/// A procedure that runs `phases` exchanges, or forever when `endless`.
///
/// On success the cleanup publishes `{"tag": <tag>}` to the device, if any.
#[derive(Debug)]
pub struct ScriptedProcedure {
    tag: String,
    priority: Priority,
    phases: u32,
    endless: bool,
    hold: Duration,
    device: Option<Arc<Device>>,
    log: Arc<ProcedureLog>,
}

impl ScriptedProcedure {
    /// Creates a one-phase procedure.
    pub fn new(tag: impl Into<String>, priority: Priority, log: Arc<ProcedureLog>) -> Self {
        Self {
            tag: tag.into(),
            priority,
            phases: 1,
            endless: false,
            hold: Duration::ZERO,
            device: None,
            log,
        }
    }

    /// Sets the number of phases.
    pub fn with_phases(mut self, phases: u32) -> Self {
        self.phases = phases.max(1);
        self
    }

    /// Continues to a new phase forever.
    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }

    /// Sleeps this long inside every phase.
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    /// Publishes to `device` on success.
    pub fn with_device(mut self, device: Arc<Device>) -> Self {
        self.device = Some(device);
        self
    }

    /// Wraps the procedure into a boxed operation.
    pub fn into_op(self, codec: Arc<FaultCodec>, controller: Arc<Controller>) -> Box<dyn Executable> {
        Operation::new(self, codec, controller).boxed()
    }
}

#[async_trait]
impl Procedure for ScriptedProcedure {
    type Codec = FaultCodec;
    type Phase = u32;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn params(&self) -> String {
        self.tag.clone()
    }

    fn begin(&mut self) -> u32 {
        0
    }

    async fn step(&mut self, phase: &mut u32, mess: &mut CommMessage<'_, FaultCodec>) -> CommResult<Transition<u32>> {
        self.log.steps.lock().push(format!("{}:{}", self.tag, phase));
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        mess.query(&mut Ping).await?;
        let next = *phase + 1;
        if self.endless || next < self.phases {
            return Ok(Transition::Continue(next));
        }
        self.log.completed.lock().push(self.tag.clone());
        Ok(Transition::Done)
    }

    fn cleanup(&mut self, ctx: &mut CleanupContext<'_>) {
        self.log.cleanups.fetch_add(1, Ordering::SeqCst);
        if let (true, Some(device)) = (ctx.is_success(), self.device.clone()) {
            ctx.publish(&device, DeviceState::new().with("tag", self.tag.as_str()));
        }
    }
}

// =============================================================================
// EchoModemConnector
// =============================================================================

/// A modem line that answers `AT` commands and dials, then echoes data.
#[derive(Debug, Clone)]
pub struct EchoModemConnector {
    dial_result: &'static str,
    connects: Arc<AtomicU64>,
}

impl EchoModemConnector {
    /// Creates a connector whose dials end with `dial_result`.
    pub fn new(dial_result: &'static str) -> Self {
        Self {
            dial_result,
            connects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the number of lines opened.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LineConnector for EchoModemConnector {
    async fn connect(&self, _modem: &ModemSpec) -> CommResult<Box<dyn IoStream>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (local, mut remote) = tokio::io::duplex(1024);
        let dial_result = self.dial_result;
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let mut connected = false;
            loop {
                let n = match remote.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if connected {
                    if remote.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    continue;
                }
                let text = String::from_utf8_lossy(&buf[..n]).to_string();
                let reply = if text.starts_with("ATDT") {
                    connected = dial_result.starts_with("CONNECT");
                    format!("\r\n{}\r\n", dial_result)
                } else if text.starts_with("AT") {
                    "\r\nOK\r\n".to_string()
                } else {
                    continue;
                };
                if remote.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::new(local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_messenger_chunks_replies() {
        let mut messenger = ScriptedMessenger::new(vec![vec![1, 2, 3, 4, 5, 6, 7]]).with_chunk(3);
        let record = messenger.record();
        messenger.open().await.unwrap();
        messenger.write(&[9]).await.unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(messenger.read(&mut buf, Duration::from_millis(10)).await.unwrap(), 3);
        let rest = read_exact(&mut messenger, 4, Duration::from_millis(10)).await.unwrap();
        assert_eq!(rest, vec![4, 5, 6, 7]);
        assert!(messenger.read(&mut buf, Duration::from_millis(10)).await.unwrap_err().is_timeout());
        assert_eq!(record.writes(), vec![vec![9]]);
        assert_eq!(record.opens(), 1);
    }

    #[tokio::test]
    async fn test_scripted_messenger_open_failure() {
        let mut messenger = ScriptedMessenger::silent().with_open_failure(CommError::connection_failed("refused"));
        assert!(messenger.open().await.is_err());
        assert!(messenger.write(&[1]).await.is_err());
        assert_eq!(messenger.record().opens(), 0);
    }
}
