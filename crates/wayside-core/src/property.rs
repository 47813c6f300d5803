// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The per-protocol codec contract.
//!
//! A [`Property`] is one encodable/decodable protocol field or field group.
//! A [`Codec`] knows how a protocol frames properties on the wire and runs
//! one request/response round trip over a [`Messenger`]. A [`CommMessage`]
//! bundles the properties of one round trip and guarantees all-or-nothing
//! decoding: the caller's properties are only updated once every member
//! has been validated.
//!
//! # Example
//!
//! ```rust,ignore
//! use wayside_core::property::CommMessage;
//!
//! async fn read_timeout(mess: &mut CommMessage<'_, E6Codec>) -> CommResult<u16> {
//!     let mut prop = AckTimeoutProp::new(E6Protocol::Serial);
//!     mess.query(&mut prop).await?;
//!     Ok(prop.timeout_ms().unwrap_or_default())
//! }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CommError, CommResult};
use crate::messenger::Messenger;

// =============================================================================
// RequestKind / MessageContext
// =============================================================================

/// Direction of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Read a value from the controller.
    Query,
    /// Write a value to the controller.
    Store,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "QUERY"),
            Self::Store => write!(f, "STORE"),
        }
    }
}

/// Addressing and timing for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageContext {
    /// Drop address of the controller.
    pub drop_address: u16,
    /// Deadline for reading the response.
    pub read_timeout: Duration,
}

impl MessageContext {
    /// Creates a context for a controller drop address.
    pub fn new(drop_address: u16, read_timeout: Duration) -> Self {
        Self {
            drop_address,
            read_timeout,
        }
    }
}

// =============================================================================
// Property
// =============================================================================

/// One protocol field or field group.
///
/// Decoding validates the response completely (length, echoed command,
/// checksum) before writing any decoded value into `self`. A failed decode
/// returns a [`CommError::Protocol`] and leaves the property unchanged.
///
/// Properties default to "unsupported" for both directions so each type
/// only implements the requests its protocol defines.
pub trait Property: Clone + Send + Sync + fmt::Debug + 'static {
    /// Encodes a query request payload.
    fn encode_query(&self, ctx: &MessageContext) -> CommResult<Vec<u8>> {
        let _ = ctx;
        Err(CommError::unsupported(format!("{:?} cannot be queried", self)))
    }

    /// Decodes a query response payload.
    fn decode_query(&mut self, response: &[u8]) -> CommResult<()> {
        let _ = response;
        Err(CommError::unsupported(format!("{:?} cannot be queried", self)))
    }

    /// Encodes a store request payload.
    fn encode_store(&self, ctx: &MessageContext) -> CommResult<Vec<u8>> {
        let _ = ctx;
        Err(CommError::unsupported(format!("{:?} cannot be stored", self)))
    }

    /// Decodes a store response payload (an acknowledgement).
    fn decode_store(&mut self, response: &[u8]) -> CommResult<()> {
        let _ = response;
        Ok(())
    }

    /// Encodes a request of the given kind.
    fn encode(&self, kind: RequestKind, ctx: &MessageContext) -> CommResult<Vec<u8>> {
        match kind {
            RequestKind::Query => self.encode_query(ctx),
            RequestKind::Store => self.encode_store(ctx),
        }
    }

    /// Decodes a response of the given kind.
    fn decode(&mut self, kind: RequestKind, response: &[u8]) -> CommResult<()> {
        match kind {
            RequestKind::Query => self.decode_query(response),
            RequestKind::Store => self.decode_store(response),
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Protocol framing for one request/response round trip.
///
/// Implementations write the framed request for `props`, read the framed
/// response, verify frame level integrity (checksums, echoes), and decode
/// each property. They may leave `props` partially decoded on error:
/// [`CommMessage`] hands them a staging copy.
#[async_trait]
pub trait Codec: Send + Sync + 'static {
    /// The property family exchanged by this codec.
    type Property: Property;

    /// Returns the protocol name.
    fn name(&self) -> &'static str;

    /// Performs one round trip.
    async fn exchange(
        &self,
        messenger: &mut dyn Messenger,
        ctx: &MessageContext,
        kind: RequestKind,
        props: &mut [Self::Property],
    ) -> CommResult<()>;
}

// =============================================================================
// CommMessage
// =============================================================================

/// A bundle of properties exchanged together with one controller.
pub struct CommMessage<'a, C: Codec> {
    codec: &'a C,
    messenger: &'a mut dyn Messenger,
    ctx: MessageContext,
    exchanges: u32,
}

impl<'a, C: Codec> CommMessage<'a, C> {
    /// Creates a message bound to a messenger and controller address.
    pub fn new(codec: &'a C, messenger: &'a mut dyn Messenger, ctx: MessageContext) -> Self {
        Self {
            codec,
            messenger,
            ctx,
            exchanges: 0,
        }
    }

    /// Returns the exchange context.
    pub fn context(&self) -> &MessageContext {
        &self.ctx
    }

    /// Returns the number of completed round trips.
    pub fn exchanges(&self) -> u32 {
        self.exchanges
    }

    /// Queries a single property.
    pub async fn query(&mut self, prop: &mut C::Property) -> CommResult<()> {
        self.exchange(RequestKind::Query, std::slice::from_mut(prop))
            .await
    }

    /// Stores a single property.
    pub async fn store(&mut self, prop: &mut C::Property) -> CommResult<()> {
        self.exchange(RequestKind::Store, std::slice::from_mut(prop))
            .await
    }

    /// Queries several properties in one round trip.
    pub async fn query_all(&mut self, props: &mut [C::Property]) -> CommResult<()> {
        self.exchange(RequestKind::Query, props).await
    }

    /// Stores several properties in one round trip.
    pub async fn store_all(&mut self, props: &mut [C::Property]) -> CommResult<()> {
        self.exchange(RequestKind::Store, props).await
    }

    async fn exchange(&mut self, kind: RequestKind, props: &mut [C::Property]) -> CommResult<()> {
        if props.is_empty() {
            return Ok(());
        }
        let mut staged = props.to_vec();
        self.messenger.discard_input().await?;
        self.codec
            .exchange(&mut *self.messenger, &self.ctx, kind, &mut staged)
            .await?;
        props.clone_from_slice(&staged);
        self.exchanges += 1;
        tracing::trace!(
            codec = self.codec.name(),
            drop = self.ctx.drop_address,
            kind = %kind,
            count = props.len(),
            "Exchange complete"
        );
        Ok(())
    }
}

impl<C: Codec> fmt::Debug for CommMessage<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommMessage")
            .field("codec", &self.codec.name())
            .field("messenger", &self.messenger.display_name())
            .field("ctx", &self.ctx)
            .field("exchanges", &self.exchanges)
            .finish()
    }
}

// =============================================================================
// Byte helpers
// =============================================================================

/// Reads a big-endian `u16` at `offset`.
#[inline]
pub fn parse16(data: &[u8], offset: usize) -> CommResult<u16> {
    match data.get(offset..offset + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(CommError::protocol_detail("DATA LEN", data.len())),
    }
}

/// Reads a byte at `offset`.
#[inline]
pub fn parse8(data: &[u8], offset: usize) -> CommResult<u8> {
    data.get(offset)
        .copied()
        .ok_or_else(|| CommError::protocol_detail("DATA LEN", data.len()))
}

// =============================================================================
// Tests
// =============================================================================
