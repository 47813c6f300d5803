// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Sierra Wireless GX cellular modem.
//!
//! The modem speaks a telnet-like text dialogue: a login prompt pair and
//! then AT commands. Responses have no length or framing, so each property
//! decides when it has seen enough.

mod props;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use wayside_core::{
    CleanupContext, CommError, CommMessage, CommResult, Codec, Controller, Device, DeviceState,
    Executable, MessageContext, Messenger, Operation, Priority, Procedure, Property, Protocol,
    RequestKind, Transition,
};

use crate::driver::ProtocolDriver;

pub use props::{GPS_QUERY, GpsFix, SierraGxProperty, parse_dms};

/// Device kind polled by the modem driver.
pub const GPS_KIND: &str = "gps";

/// Largest response accepted.
pub const MAX_CHARS: usize = 4096;

// =============================================================================
// SierraGxCodec
// =============================================================================

/// Writes a command and reads until the property's response is complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct SierraGxCodec;

impl SierraGxCodec {
    async fn read_response(
        messenger: &mut dyn Messenger,
        ctx: &MessageContext,
        prop: &SierraGxProperty,
    ) -> CommResult<Vec<u8>> {
        let deadline = Instant::now() + ctx.read_timeout;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 256];
        while !prop.response_complete(&buf) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(CommError::timeout(ctx.read_timeout));
            }
            let n = messenger.read(&mut chunk, left).await?;
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > MAX_CHARS {
                return Err(CommError::protocol_detail("RESPONSE TOO LONG", buf.len()));
            }
        }
        Ok(buf)
    }
}

#[async_trait]
impl Codec for SierraGxCodec {
    type Property = SierraGxProperty;

    fn name(&self) -> &'static str {
        "sierragx"
    }

    async fn exchange(
        &self,
        messenger: &mut dyn Messenger,
        ctx: &MessageContext,
        kind: RequestKind,
        props: &mut [SierraGxProperty],
    ) -> CommResult<()> {
        for prop in props.iter_mut() {
            messenger.write(&prop.encode(kind, ctx)?).await?;
            let response = Self::read_response(messenger, ctx, prop).await?;
            prop.decode(kind, &response)?;
        }
        Ok(())
    }
}

// =============================================================================
// QueryGps
// =============================================================================

/// Phases of a location query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsPhase {
    /// Send the login name.
    Username,
    /// Send the password.
    Password,
    /// Query the position.
    Location,
}

/// Logs in when credentials are configured, then reads the position.
#[derive(Debug)]
pub struct QueryGps {
    modem: Arc<Device>,
    fix: Option<GpsFix>,
}

impl QueryGps {
    /// Creates the operation. Credentials come from the device's
    /// `username` and `password` parameters.
    pub fn new(modem: Arc<Device>) -> Self {
        Self { modem, fix: None }
    }

    /// Returns the decoded position.
    pub fn fix(&self) -> Option<GpsFix> {
        self.fix
    }
}

#[async_trait]
impl Procedure for QueryGps {
    type Codec = SierraGxCodec;
    type Phase = GpsPhase;

    fn name(&self) -> &'static str {
        "query_gps"
    }

    fn priority(&self) -> Priority {
        Priority::Poll
    }

    fn params(&self) -> String {
        self.modem.id().to_string()
    }

    fn begin(&mut self) -> GpsPhase {
        if self.modem.param("username").is_some() {
            GpsPhase::Username
        } else {
            GpsPhase::Location
        }
    }

    async fn step(
        &mut self,
        phase: &mut GpsPhase,
        mess: &mut CommMessage<'_, SierraGxCodec>,
    ) -> CommResult<Transition<GpsPhase>> {
        match phase {
            GpsPhase::Username => {
                let name = self.modem.param("username").unwrap_or_default().to_string();
                mess.query(&mut SierraGxProperty::Username(name)).await?;
                Ok(Transition::Continue(GpsPhase::Password))
            }
            GpsPhase::Password => {
                let pw = self.modem.param("password").unwrap_or_default().to_string();
                mess.query(&mut SierraGxProperty::Password(pw)).await?;
                Ok(Transition::Continue(GpsPhase::Location))
            }
            GpsPhase::Location => {
                let mut prop = SierraGxProperty::gps();
                mess.query(&mut prop).await?;
                self.fix = prop.fix();
                Ok(Transition::Done)
            }
        }
    }

    fn cleanup(&mut self, ctx: &mut CleanupContext<'_>) {
        if !ctx.is_success() {
            return;
        }
        if let Some(fix) = self.fix {
            let state = DeviceState::new().with("lat", fix.lat).with("lon", fix.lon);
            ctx.publish(&self.modem, state);
        }
    }
}

// =============================================================================
// SierraGxDriver
// =============================================================================

/// Polls the position of every GPS modem.
#[derive(Debug, Clone)]
pub struct SierraGxDriver {
    codec: Arc<SierraGxCodec>,
}

impl SierraGxDriver {
    /// Creates the driver.
    pub fn new() -> Self {
        Self {
            codec: Arc::new(SierraGxCodec),
        }
    }
}

impl Default for SierraGxDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDriver for SierraGxDriver {
    fn protocol(&self) -> Protocol {
        Protocol::SierraGx
    }

    fn poll_operations(&self, controller: &Arc<Controller>) -> Vec<Box<dyn Executable>> {
        controller
            .devices()
            .iter()
            .filter(|d| d.kind() == GPS_KIND)
            .map(|modem| Operation::new(QueryGps::new(modem.clone()), self.codec.clone(), controller.clone()).boxed())
            .collect()
    }
}
