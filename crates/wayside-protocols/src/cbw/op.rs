// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Beacon operations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use wayside_core::{
    CleanupContext, CommError, CommMessage, CommResult, Deadline, Device, DeviceState, Priority,
    Procedure, Transition,
};

use super::CbwCodec;
use super::props::{CbwProperty, CommandProperty, StateProperty};

/// Pause between two confirmation reads.
const CONFIRM_INTERVAL: Duration = Duration::from_millis(250);

fn beacon_pin(beacon: &Device) -> CommResult<u16> {
    beacon
        .pin()
        .ok_or_else(|| CommError::unsupported(format!("beacon {} has no relay pin", beacon.id())))
}

async fn read_relay(mess: &mut CommMessage<'_, CbwCodec>, pin: u16) -> CommResult<bool> {
    let mut prop = CbwProperty::from(StateProperty::new(pin));
    mess.query(&mut prop).await?;
    match prop {
        CbwProperty::State(p) => p.is_on().ok_or_else(|| CommError::protocol_detail("RELAY", pin)),
        CbwProperty::Command(_) => Err(CommError::protocol_detail("RELAY", pin)),
    }
}

// =============================================================================
// ChangeBeaconState
// =============================================================================

/// Phases of a beacon change.
#[derive(Debug)]
pub enum BeaconPhase {
    /// Switch the beacon relay.
    ChangeBeacon,
    /// Switch the current sensor circuit.
    ChangeVerify(u16),
    /// Read the relay back until it reports the new state.
    Confirm(Deadline),
}

/// Turns a beacon's flashing on or off.
///
/// Two requests are the same operation when they target the same beacon
/// with the same state. A beacon with a `confirm_ms` parameter is read back
/// until its relay agrees or the time runs out.
#[derive(Debug)]
pub struct ChangeBeaconState {
    beacon: Arc<Device>,
    flash: bool,
}

impl ChangeBeaconState {
    /// Creates the operation.
    pub fn new(beacon: Arc<Device>, flash: bool) -> Self {
        Self { beacon, flash }
    }

    fn confirm_window(&self) -> Option<Duration> {
        self.beacon
            .param("confirm_ms")
            .and_then(|ms| ms.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    fn after_change(&self) -> Transition<BeaconPhase> {
        match self.confirm_window() {
            Some(window) => Transition::Continue(BeaconPhase::Confirm(Deadline::after(window))),
            None => Transition::Done,
        }
    }
}

#[async_trait]
impl Procedure for ChangeBeaconState {
    type Codec = CbwCodec;
    type Phase = BeaconPhase;

    fn name(&self) -> &'static str {
        "change_beacon_state"
    }

    fn priority(&self) -> Priority {
        Priority::Command
    }

    fn params(&self) -> String {
        format!("{}:{}", self.beacon.id(), self.flash)
    }

    fn begin(&mut self) -> BeaconPhase {
        BeaconPhase::ChangeBeacon
    }

    async fn step(
        &mut self,
        phase: &mut BeaconPhase,
        mess: &mut CommMessage<'_, CbwCodec>,
    ) -> CommResult<Transition<BeaconPhase>> {
        match phase {
            BeaconPhase::ChangeBeacon => {
                let mut prop = CbwProperty::from(CommandProperty::new(beacon_pin(&self.beacon)?, self.flash));
                mess.store(&mut prop).await?;
                Ok(match self.beacon.verify_pin() {
                    Some(pin) => Transition::Continue(BeaconPhase::ChangeVerify(pin)),
                    None => self.after_change(),
                })
            }
            BeaconPhase::ChangeVerify(pin) => {
                let mut prop = CbwProperty::from(CommandProperty::new(*pin, self.flash));
                mess.store(&mut prop).await?;
                Ok(self.after_change())
            }
            BeaconPhase::Confirm(deadline) => {
                if read_relay(mess, beacon_pin(&self.beacon)?).await? == self.flash {
                    return Ok(Transition::Done);
                }
                if deadline.expired() {
                    return Ok(Transition::fail("BEACON NOT CONFIRMED"));
                }
                tokio::time::sleep(CONFIRM_INTERVAL.min(deadline.remaining())).await;
                Ok(Transition::Continue(BeaconPhase::Confirm(*deadline)))
            }
        }
    }

    fn cleanup(&mut self, ctx: &mut CleanupContext<'_>) {
        if ctx.is_success() {
            let state = DeviceState::new().with("flashing", self.flash);
            ctx.publish(&self.beacon, state);
        }
    }
}

// =============================================================================
// QueryBeaconState
// =============================================================================

/// Reads whether a beacon is flashing.
#[derive(Debug)]
pub struct QueryBeaconState {
    beacon: Arc<Device>,
    flashing: Option<bool>,
    verify: Option<bool>,
}

impl QueryBeaconState {
    /// Creates the operation.
    pub fn new(beacon: Arc<Device>) -> Self {
        Self {
            beacon,
            flashing: None,
            verify: None,
        }
    }
}

#[async_trait]
impl Procedure for QueryBeaconState {
    type Codec = CbwCodec;
    type Phase = ();

    fn name(&self) -> &'static str {
        "query_beacon_state"
    }

    fn priority(&self) -> Priority {
        Priority::Poll
    }

    fn params(&self) -> String {
        self.beacon.id().to_string()
    }

    fn begin(&mut self) {}

    async fn step(&mut self, _phase: &mut (), mess: &mut CommMessage<'_, CbwCodec>) -> CommResult<Transition<()>> {
        self.flashing = Some(read_relay(mess, beacon_pin(&self.beacon)?).await?);
        if let Some(pin) = self.beacon.verify_pin() {
            self.verify = Some(read_relay(mess, pin).await?);
        }
        Ok(Transition::Done)
    }

    fn cleanup(&mut self, ctx: &mut CleanupContext<'_>) {
        if !ctx.is_success() {
            return;
        }
        let mut state = DeviceState::new();
        if let Some(flashing) = self.flashing {
            state.insert("flashing", flashing);
        }
        if let Some(verify) = self.verify {
            state.insert("verify", verify);
        }
        ctx.publish(&self.beacon, state);
    }
}
