// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Web relay controller driving flashing beacons.
//!
//! Each property is one HTTP `GET` over a kept-alive connection. The
//! response body is the controller's XML state document.

mod op;
mod props;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use wayside_core::messenger::find;
use wayside_core::{
    CommError, CommResult, Codec, Controller, Device, Executable, MessageContext, Messenger,
    Operation, Property, Protocol, RequestKind,
};

use crate::driver::ProtocolDriver;

pub use op::{BeaconPhase, ChangeBeaconState, QueryBeaconState};
pub use props::{CbwProperty, CommandProperty, STATE_PATH, StateProperty, relay_state};

/// Device kind polled by the relay driver.
pub const BEACON_KIND: &str = "beacon";

/// Largest response accepted.
pub const MAX_RESPONSE: usize = 8192;

const HEADER_END: &[u8] = b"\r\n\r\n";
const DOC_END: &[u8] = b"</datavalues>";

// =============================================================================
// HTTP framing
// =============================================================================

/// Parsed response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Declared body length.
    pub content_length: Option<usize>,
}

/// Parses the status line and headers of a response.
pub fn parse_head(head: &str) -> CommResult<ResponseHead> {
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(CommError::protocol_detail("HTTP STATUS", status_line));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| CommError::protocol_detail("HTTP STATUS", status_line))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut content_length = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| CommError::protocol_detail("CONTENT LENGTH", value.trim()))?;
                content_length = Some(len);
            }
        }
    }
    Ok(ResponseHead {
        status,
        reason,
        content_length,
    })
}

async fn read_more(
    messenger: &mut dyn Messenger,
    buf: &mut Vec<u8>,
    deadline: Instant,
    timeout: Duration,
) -> CommResult<()> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(CommError::timeout(timeout));
    }
    let mut chunk = [0u8; 512];
    let n = messenger.read(&mut chunk, left).await?;
    buf.extend_from_slice(&chunk[..n]);
    if buf.len() > MAX_RESPONSE {
        return Err(CommError::protocol_detail("RESPONSE TOO LONG", buf.len()));
    }
    Ok(())
}

// =============================================================================
// CbwCodec
// =============================================================================

/// Sends one `GET` per property and hands the body to the property.
#[derive(Debug, Clone, Copy, Default)]
pub struct CbwCodec;

impl CbwCodec {
    /// Builds the request for `path`.
    pub fn request(path: &[u8]) -> Vec<u8> {
        let mut req = b"GET ".to_vec();
        req.extend_from_slice(path);
        req.extend_from_slice(b" HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        req
    }

    async fn read_response(messenger: &mut dyn Messenger, ctx: &MessageContext) -> CommResult<Vec<u8>> {
        let deadline = Instant::now() + ctx.read_timeout;
        let mut buf = Vec::new();
        let body_start = loop {
            if let Some(pos) = find(&buf, HEADER_END) {
                break pos + HEADER_END.len();
            }
            read_more(messenger, &mut buf, deadline, ctx.read_timeout).await?;
        };
        let head = std::str::from_utf8(&buf[..body_start]).map_err(|_| CommError::protocol("HTTP HEADER"))?;
        let head = parse_head(head)?;

        match head.content_length {
            Some(len) => {
                while buf.len() - body_start < len {
                    read_more(messenger, &mut buf, deadline, ctx.read_timeout).await?;
                }
                buf.truncate(body_start + len);
            }
            None if head.status == 200 => {
                while find(&buf[body_start..], DOC_END).is_none() {
                    read_more(messenger, &mut buf, deadline, ctx.read_timeout).await?;
                }
            }
            None => {}
        }

        if head.status != 200 {
            return Err(CommError::controller_code(
                i64::from(head.status),
                format!("HTTP {} {}", head.status, head.reason),
            ));
        }
        Ok(buf.split_off(body_start))
    }
}

#[async_trait]
impl Codec for CbwCodec {
    type Property = CbwProperty;

    fn name(&self) -> &'static str {
        "cbw"
    }

    async fn exchange(
        &self,
        messenger: &mut dyn Messenger,
        ctx: &MessageContext,
        kind: RequestKind,
        props: &mut [CbwProperty],
    ) -> CommResult<()> {
        for prop in props.iter_mut() {
            let path = prop.encode(kind, ctx)?;
            tracing::trace!(path = %String::from_utf8_lossy(&path), "cbw request");
            messenger.write(&Self::request(&path)).await?;
            let body = Self::read_response(messenger, ctx).await?;
            prop.decode(kind, &body)?;
        }
        Ok(())
    }
}

// =============================================================================
// CbwDriver
// =============================================================================

/// Polls the state of every wired beacon.
#[derive(Debug, Clone)]
pub struct CbwDriver {
    codec: Arc<CbwCodec>,
}

impl CbwDriver {
    /// Creates the driver.
    pub fn new() -> Self {
        Self {
            codec: Arc::new(CbwCodec),
        }
    }

    /// Builds a beacon change command.
    pub fn change_state(&self, controller: &Arc<Controller>, beacon: &Arc<Device>, flash: bool) -> Box<dyn Executable> {
        Operation::new(ChangeBeaconState::new(beacon.clone(), flash), self.codec.clone(), controller.clone()).boxed()
    }
}

impl Default for CbwDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDriver for CbwDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Cbw
    }

    fn poll_operations(&self, controller: &Arc<Controller>) -> Vec<Box<dyn Executable>> {
        controller
            .devices()
            .iter()
            .filter(|d| d.kind() == BEACON_KIND && d.pin().is_some())
            .map(|beacon| {
                Operation::new(QueryBeaconState::new(beacon.clone()), self.codec.clone(), controller.clone()).boxed()
            })
            .collect()
    }
}
