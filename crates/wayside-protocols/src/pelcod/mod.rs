// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Pelco D camera control.
//!
//! Every request is a store of one 7-byte packet; cameras do not answer.
//!
//! ```text
//! ┌──────┬──────┬──────┬──────┬───────┬───────┬──────────┐
//! │ 0xFF │ drop │ cmd1 │ cmd2 │ data1 │ data2 │ checksum │
//! └──────┴──────┴──────┴──────┴───────┴───────┴──────────┘
//!   checksum = (drop + cmd1 + cmd2 + data1 + data2) mod 256
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use wayside_core::{
    CleanupContext, CommError, CommMessage, CommResult, Codec, Controller, Device, DeviceState,
    Executable, MessageContext, Messenger, Operation, Priority, Procedure, Property, Protocol,
    RequestKind, Transition,
};

use crate::driver::ProtocolDriver;

/// Sync byte that starts every packet.
pub const SYNC: u8 = 0xFF;

/// Maximum pan or tilt speed.
pub const MAX_SPEED: u8 = 0x3F;

const AUTO_IRIS: u8 = 0x2D;
const PRESET_STORE: u8 = 0x03;
const PRESET_CLEAR: u8 = 0x05;
const PRESET_RECALL: u8 = 0x07;

const PAN_RIGHT: u8 = 0x02;
const PAN_LEFT: u8 = 0x04;
const TILT_UP: u8 = 0x08;
const TILT_DOWN: u8 = 0x10;
const ZOOM_TELE: u8 = 0x20;
const ZOOM_WIDE: u8 = 0x40;

/// Returns the checksum of a packet: the sum of bytes 1 through 5.
pub fn checksum(packet: &[u8; 7]) -> u8 {
    packet[1..6].iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

fn packet(drop: u16, cmd1: u8, cmd2: u8, data1: u8, data2: u8) -> CommResult<Vec<u8>> {
    let drop = u8::try_from(drop)
        .map_err(|_| CommError::unsupported(format!("pelco d drop {} out of range", drop)))?;
    let mut pkt = [SYNC, drop, cmd1, cmd2, data1, data2, 0];
    pkt[6] = checksum(&pkt);
    Ok(pkt.to_vec())
}

// =============================================================================
// Properties
// =============================================================================

/// What to do with a preset slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetAction {
    /// Save the current position.
    Store,
    /// Move to the saved position.
    Recall,
    /// Forget the saved position.
    Clear,
}

impl PresetAction {
    fn command(self) -> u8 {
        match self {
            Self::Store => PRESET_STORE,
            Self::Recall => PRESET_RECALL,
            Self::Clear => PRESET_CLEAR,
        }
    }
}

/// Zoom motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zoom {
    /// No zoom motion.
    #[default]
    Stop,
    /// Zoom in.
    Tele,
    /// Zoom out.
    Wide,
}

/// A Pelco D request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PelcoDProperty {
    /// Selects automatic (`true`) or manual iris.
    AutoIris(bool),
    /// Stores, recalls, or clears a preset.
    Preset {
        /// Action on the slot.
        action: PresetAction,
        /// Preset number, 1 or more.
        number: u8,
    },
    /// Continuous motion. Negative pan is left, negative tilt is down.
    /// Zero on every axis stops the camera.
    PanTilt {
        /// Pan speed in `-63..=63`.
        pan: i8,
        /// Tilt speed in `-63..=63`.
        tilt: i8,
        /// Zoom motion.
        zoom: Zoom,
    },
}

impl PelcoDProperty {
    /// Returns a stop command.
    pub fn stop() -> Self {
        Self::PanTilt {
            pan: 0,
            tilt: 0,
            zoom: Zoom::Stop,
        }
    }

    /// Returns `true` for requests that move the camera.
    pub fn is_motion(&self) -> bool {
        matches!(self, Self::PanTilt { pan, tilt, zoom } if *pan != 0 || *tilt != 0 || *zoom != Zoom::Stop)
    }
}

fn speed(value: i8) -> u8 {
    value.unsigned_abs().min(MAX_SPEED)
}

impl Property for PelcoDProperty {
    fn encode_store(&self, ctx: &MessageContext) -> CommResult<Vec<u8>> {
        match *self {
            Self::AutoIris(auto) => packet(ctx.drop_address, 0x00, AUTO_IRIS, 0x00, u8::from(!auto)),
            Self::Preset { action, number } => {
                if number == 0 {
                    return Err(CommError::unsupported("preset 0"));
                }
                packet(ctx.drop_address, 0x00, action.command(), 0x00, number)
            }
            Self::PanTilt { pan, tilt, zoom } => {
                let mut cmd2 = 0;
                if pan > 0 {
                    cmd2 |= PAN_RIGHT;
                } else if pan < 0 {
                    cmd2 |= PAN_LEFT;
                }
                if tilt > 0 {
                    cmd2 |= TILT_UP;
                } else if tilt < 0 {
                    cmd2 |= TILT_DOWN;
                }
                cmd2 |= match zoom {
                    Zoom::Stop => 0,
                    Zoom::Tele => ZOOM_TELE,
                    Zoom::Wide => ZOOM_WIDE,
                };
                packet(ctx.drop_address, 0x00, cmd2, speed(pan), speed(tilt))
            }
        }
    }
}

impl fmt::Display for PelcoDProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoIris(auto) => write!(f, "auto iris: {}", auto),
            Self::Preset { action, number } => write!(f, "preset {:?} {}", action, number),
            Self::PanTilt { pan, tilt, zoom } => write!(f, "pan {} tilt {} zoom {:?}", pan, tilt, zoom),
        }
    }
}

// =============================================================================
// PelcoDCodec
// =============================================================================

/// Writes one packet per property.
#[derive(Debug, Clone, Copy, Default)]
pub struct PelcoDCodec;

#[async_trait]
impl Codec for PelcoDCodec {
    type Property = PelcoDProperty;

    fn name(&self) -> &'static str {
        "pelcod"
    }

    async fn exchange(
        &self,
        messenger: &mut dyn Messenger,
        ctx: &MessageContext,
        kind: RequestKind,
        props: &mut [PelcoDProperty],
    ) -> CommResult<()> {
        if kind == RequestKind::Query {
            return Err(CommError::unsupported("pelco d has no queries"));
        }
        for prop in props.iter_mut() {
            messenger.write(&prop.encode(kind, ctx)?).await?;
            prop.decode(kind, &[])?;
        }
        Ok(())
    }
}

// =============================================================================
// CameraCommand
// =============================================================================

/// Sends one command to a camera.
#[derive(Debug)]
pub struct CameraCommand {
    camera: Arc<Device>,
    command: PelcoDProperty,
}

impl CameraCommand {
    /// Creates the operation.
    pub fn new(camera: Arc<Device>, command: PelcoDProperty) -> Self {
        Self { camera, command }
    }
}

#[async_trait]
impl Procedure for CameraCommand {
    type Codec = PelcoDCodec;
    type Phase = ();

    fn name(&self) -> &'static str {
        "camera_command"
    }

    fn priority(&self) -> Priority {
        Priority::Command
    }

    fn params(&self) -> String {
        format!("{}:{}", self.camera.id(), self.command)
    }

    fn begin(&mut self) {}

    async fn step(
        &mut self,
        _phase: &mut (),
        mess: &mut CommMessage<'_, PelcoDCodec>,
    ) -> CommResult<Transition<()>> {
        let mut prop = self.command.clone();
        mess.store(&mut prop).await?;
        Ok(Transition::Done)
    }

    fn cleanup(&mut self, ctx: &mut CleanupContext<'_>) {
        if !ctx.is_success() {
            return;
        }
        let mut state = DeviceState::new().with("last_command", self.command.to_string());
        match self.command {
            PelcoDProperty::AutoIris(auto) => state.insert("auto_iris", auto),
            PelcoDProperty::Preset {
                action: PresetAction::Recall,
                number,
            } => state.insert("preset", number),
            _ => {}
        }
        state.insert("moving", self.command.is_motion());
        ctx.publish(&self.camera, state);
    }
}

// =============================================================================
// PelcoDDriver
// =============================================================================

/// Pelco D cameras are command only.
#[derive(Debug, Clone)]
pub struct PelcoDDriver {
    codec: Arc<PelcoDCodec>,
}

impl PelcoDDriver {
    /// Creates the driver.
    pub fn new() -> Self {
        Self {
            codec: Arc::new(PelcoDCodec),
        }
    }

    /// Builds a command operation for a camera.
    pub fn command(
        &self,
        controller: &Arc<Controller>,
        camera: &Arc<Device>,
        command: PelcoDProperty,
    ) -> Box<dyn Executable> {
        Operation::new(CameraCommand::new(camera.clone(), command), self.codec.clone(), controller.clone()).boxed()
    }
}

impl Default for PelcoDDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDriver for PelcoDDriver {
    fn protocol(&self) -> Protocol {
        Protocol::PelcoD
    }

    fn poll_operations(&self, _controller: &Arc<Controller>) -> Vec<Box<dyn Executable>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptMessenger;
    use std::time::Duration;
    use wayside_core::{OperationPolicy, Outcome, StepOutcome, Value};

    fn ctx(drop: u16) -> MessageContext {
        MessageContext::new(drop, Duration::from_millis(100))
    }

    #[test]
    fn test_auto_iris_packet() {
        let pkt = PelcoDProperty::AutoIris(true).encode_store(&ctx(1)).unwrap();
        assert_eq!(pkt, vec![0xFF, 0x01, 0x00, 0x2D, 0x00, 0x00, 0x2E]);

        let pkt = PelcoDProperty::AutoIris(false).encode_store(&ctx(1)).unwrap();
        assert_eq!(pkt, vec![0xFF, 0x01, 0x00, 0x2D, 0x00, 0x01, 0x2F]);
    }

    #[test]
    fn test_checksum_wraps() {
        let prop = PelcoDProperty::Preset {
            action: PresetAction::Recall,
            number: 0xFA,
        };
        let pkt = prop.encode_store(&ctx(0x10)).unwrap();
        assert_eq!(pkt[6], (0x10u16 + 0x07 + 0xFA) as u8);
    }

    #[test]
    fn test_pan_tilt_bits() {
        let prop = PelcoDProperty::PanTilt {
            pan: -100,
            tilt: 20,
            zoom: Zoom::Tele,
        };
        let pkt = prop.encode_store(&ctx(2)).unwrap();
        assert_eq!(pkt[3], PAN_LEFT | TILT_UP | ZOOM_TELE);
        assert_eq!(pkt[4], MAX_SPEED);
        assert_eq!(pkt[5], 20);
        assert!(prop.is_motion());
        assert!(!PelcoDProperty::stop().is_motion());
    }

    #[test]
    fn test_rejects_bad_requests() {
        let err = PelcoDProperty::AutoIris(true).encode_store(&ctx(300)).unwrap_err();
        assert!(matches!(err, CommError::Unsupported { .. }));

        let preset = PelcoDProperty::Preset {
            action: PresetAction::Store,
            number: 0,
        };
        assert!(preset.encode_store(&ctx(1)).is_err());
        assert!(PelcoDProperty::AutoIris(true).encode_query(&ctx(1)).is_err());
    }

    #[tokio::test]
    async fn test_camera_command_writes_without_reading() {
        let camera = Arc::new(Device::new("cam-1", "camera"));
        let controller = Arc::new(Controller::new("cam-ctl", "line-2", 3).with_device(Device::new("cam-1", "camera")));
        let command = PelcoDProperty::Preset {
            action: PresetAction::Recall,
            number: 4,
        };
        let mut op = PelcoDDriver::new().command(&controller, &camera, command);
        assert_eq!(op.priority(), Priority::Command);
        op.begin(&OperationPolicy::default());

        let mut messenger = ScriptMessenger::silent();
        let outcome = op.step(&mut messenger).await;
        assert_eq!(outcome, StepOutcome::Finished(Outcome::Success));
        assert_eq!(messenger.written, vec![vec![0xFF, 0x03, 0x00, 0x07, 0x00, 0x04, 0x0E]]);

        op.finish(Outcome::Success, None).unwrap();
        assert_eq!(camera.state().get("preset"), Some(&Value::Int(4)));
        assert_eq!(camera.state().get("moving"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_driver_has_no_polls() {
        let controller = Arc::new(Controller::new("cam-ctl", "line-2", 3).with_device(Device::new("c", "camera")));
        assert!(PelcoDDriver::new().poll_operations(&controller).is_empty());
    }
}
