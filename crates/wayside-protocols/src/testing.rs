// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Scripted messenger shared by the codec tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;

use wayside_core::{CommError, CommResult, Messenger, TransportState};

/// Answers each write with the next scripted reply.
///
/// Replies are delivered in chunks of at most `chunk` bytes to exercise
/// partial reads. A write with no reply left produces read timeouts.
#[derive(Debug, Default)]
pub struct ScriptMessenger {
    replies: VecDeque<Vec<u8>>,
    pending: VecDeque<u8>,
    pub written: Vec<Vec<u8>>,
    chunk: usize,
}

impl ScriptMessenger {
    pub fn new(replies: Vec<Vec<u8>>) -> Self {
        Self {
            replies: replies.into(),
            pending: VecDeque::new(),
            written: Vec::new(),
            chunk: 5,
        }
    }

    pub fn silent() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Messenger for ScriptMessenger {
    fn display_name(&self) -> String {
        "script".to_string()
    }

    fn state(&self) -> TransportState {
        TransportState::Connected
    }

    async fn open(&mut self) -> CommResult<()> {
        Ok(())
    }

    async fn close(&mut self) {}

    async fn write(&mut self, bytes: &[u8]) -> CommResult<()> {
        self.written.push(bytes.to_vec());
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
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}
