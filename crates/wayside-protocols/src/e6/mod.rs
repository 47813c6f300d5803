// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! E6 RF tag reader protocol.
//!
//! # Frame
//!
//! ```text
//! ┌──────┬───────────────┬────────────────┬──────────┬──────────┐
//! │ len  │ group (u16 BE)│ data ...       │ crc hi   │ crc lo   │
//! └──────┴───────────────┴────────────────┴──────────┴──────────┘
//!   len = number of bytes after it (payload + 2 CRC bytes)
//!   crc = CRC-16/CCITT-FALSE over len and payload
//! ```

mod op;
mod props;

use std::sync::Arc;

use async_trait::async_trait;

use wayside_core::messenger::read_exact;
use wayside_core::{
    CommError, CommResult, Codec, Controller, Device, Executable, MessageContext, Messenger,
    Operation, Priority, Property, Protocol, RequestKind,
};

use crate::driver::ProtocolDriver;

pub use op::QueryReaderSettings;
pub use props::{AckProtocol, AckTimeoutProp, CommandGroup, DataDetectProp, E6Property, RfProtocol};

/// Device kind polled by the E6 driver.
pub const READER_KIND: &str = "tag_reader";

// =============================================================================
// CRC
// =============================================================================

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF_u16, |crc, byte| {
        (0..8).fold(crc ^ (u16::from(*byte) << 8), |crc, _| {
            if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            }
        })
    })
}

/// Frames a payload.
pub fn encode_frame(payload: &[u8]) -> CommResult<Vec<u8>> {
    let len = u8::try_from(payload.len() + 2)
        .map_err(|_| CommError::unsupported(format!("payload of {} bytes", payload.len())))?;
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(len);
    frame.extend_from_slice(payload);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Validates a frame body (everything after the length byte) and returns its payload.
pub fn decode_frame(len: u8, body: &[u8]) -> CommResult<&[u8]> {
    if body.len() != usize::from(len) || body.len() < 4 {
        return Err(CommError::protocol_detail("FRAME LEN", body.len()));
    }
    let (payload, crc) = body.split_at(body.len() - 2);
    let mut covered = Vec::with_capacity(body.len() - 1);
    covered.push(len);
    covered.extend_from_slice(payload);
    if crc16(&covered).to_be_bytes() != [crc[0], crc[1]] {
        return Err(CommError::protocol("CRC"));
    }
    Ok(payload)
}

// =============================================================================
// E6Codec
// =============================================================================

/// Frames one E6 packet per property.
#[derive(Debug, Clone, Copy, Default)]
pub struct E6Codec;

impl E6Codec {
    async fn read_frame(messenger: &mut dyn Messenger, ctx: &MessageContext) -> CommResult<Vec<u8>> {
        let len = read_exact(messenger, 1, ctx.read_timeout).await?[0];
        let body = read_exact(messenger, usize::from(len), ctx.read_timeout).await?;
        Ok(decode_frame(len, &body)?.to_vec())
    }
}

#[async_trait]
impl Codec for E6Codec {
    type Property = E6Property;

    fn name(&self) -> &'static str {
        "e6"
    }

    async fn exchange(
        &self,
        messenger: &mut dyn Messenger,
        ctx: &MessageContext,
        kind: RequestKind,
        props: &mut [E6Property],
    ) -> CommResult<()> {
        for prop in props.iter_mut() {
            let group = prop.group();
            let mut payload = group.code().to_be_bytes().to_vec();
            payload.extend_from_slice(&prop.encode(kind, ctx)?);
            messenger.write(&encode_frame(&payload)?).await?;

            let response = Self::read_frame(messenger, ctx).await?;
            let echoed = wayside_core::property::parse16(&response, 0)?;
            if CommandGroup::from_code(echoed) != Some(group) {
                return Err(CommError::protocol_detail("GROUP", format!("{:#06x}", echoed)));
            }
            prop.decode(kind, &response)?;
        }
        Ok(())
    }
}

// =============================================================================
// E6Driver
// =============================================================================

/// Polls the settings of every tag reader.
#[derive(Debug, Clone)]
pub struct E6Driver {
    codec: Arc<E6Codec>,
}

impl E6Driver {
    /// Creates the driver.
    pub fn new() -> Self {
        Self {
            codec: Arc::new(E6Codec),
        }
    }

    /// Builds a settings query for a reader.
    pub fn query_settings(&self, controller: &Arc<Controller>, reader: &Arc<Device>) -> Box<dyn Executable> {
        Operation::new(QueryReaderSettings::new(reader.clone()), self.codec.clone(), controller.clone()).boxed()
    }
}

impl Default for E6Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDriver for E6Driver {
    fn protocol(&self) -> Protocol {
        Protocol::E6
    }

    fn poll_operations(&self, controller: &Arc<Controller>) -> Vec<Box<dyn Executable>> {
        controller
            .devices()
            .iter()
            .filter(|d| d.kind() == READER_KIND)
            .map(|reader| {
                Operation::new(QueryReaderSettings::new(reader.clone()), self.codec.clone(), controller.clone())
                    .with_priority(Priority::Poll)
                    .boxed()
            })
            .collect()
    }
}
