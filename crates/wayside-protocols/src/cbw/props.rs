// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Relay properties.

use std::fmt;

use wayside_core::{CommError, CommResult, MessageContext, Property};

/// Document served by the controller.
pub const STATE_PATH: &str = "/state.xml";

/// Extracts the state of relay `pin` from a state document.
pub fn relay_state(body: &str, pin: u16) -> CommResult<bool> {
    let open = format!("<relay{}state>", pin);
    let close = format!("</relay{}state>", pin);
    let start = body
        .find(&open)
        .map(|i| i + open.len())
        .ok_or_else(|| CommError::protocol_detail("RELAY", pin))?;
    let len = body[start..]
        .find(&close)
        .ok_or_else(|| CommError::protocol_detail("RELAY", pin))?;
    match body[start..start + len].trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(CommError::protocol_detail("RELAY VALUE", other)),
    }
}

fn body_str(response: &[u8]) -> CommResult<&str> {
    std::str::from_utf8(response).map_err(|_| CommError::protocol("BODY"))
}

// =============================================================================
// CommandProperty
// =============================================================================

/// Switches one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandProperty {
    pin: u16,
    on: bool,
}

impl CommandProperty {
    /// Creates a command for relay `pin`.
    pub fn new(pin: u16, on: bool) -> Self {
        Self { pin, on }
    }

    /// Returns the relay pin.
    pub fn pin(&self) -> u16 {
        self.pin
    }
}

impl Property for CommandProperty {
    fn encode_store(&self, _ctx: &MessageContext) -> CommResult<Vec<u8>> {
        Ok(format!("{}?relay{}State={}", STATE_PATH, self.pin, u8::from(self.on)).into_bytes())
    }

    /// The controller answers with its state document. A document that
    /// reports the relay must agree with the command.
    fn decode_store(&mut self, response: &[u8]) -> CommResult<()> {
        let body = body_str(response)?;
        match relay_state(body, self.pin) {
            Ok(state) if state != self.on => Err(CommError::protocol_detail("RELAY VALUE", u8::from(state))),
            Ok(_) => Ok(()),
            Err(_) if body.trim().is_empty() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for CommandProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relay {} -> {}", self.pin, if self.on { "on" } else { "off" })
    }
}

// =============================================================================
// StateProperty
// =============================================================================

/// Reads one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateProperty {
    pin: u16,
    on: Option<bool>,
}

impl StateProperty {
    /// Creates a query of relay `pin`.
    pub fn new(pin: u16) -> Self {
        Self { pin, on: None }
    }

    /// Returns the relay pin.
    pub fn pin(&self) -> u16 {
        self.pin
    }

    /// Returns the decoded state.
    pub fn is_on(&self) -> Option<bool> {
        self.on
    }
}

impl Property for StateProperty {
    fn encode_query(&self, _ctx: &MessageContext) -> CommResult<Vec<u8>> {
        Ok(STATE_PATH.as_bytes().to_vec())
    }

    fn decode_query(&mut self, response: &[u8]) -> CommResult<()> {
        self.on = Some(relay_state(body_str(response)?, self.pin)?);
        Ok(())
    }
}

impl fmt::Display for StateProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.on {
            Some(on) => write!(f, "relay {}: {}", self.pin, if on { "on" } else { "off" }),
            None => write!(f, "relay {}: ?", self.pin),
        }
    }
}

// =============================================================================
// CbwProperty
// =============================================================================

/// Any relay controller request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CbwProperty {
    /// Switch a relay.
    Command(CommandProperty),
    /// Read a relay.
    State(StateProperty),
}

impl Property for CbwProperty {
    fn encode_query(&self, ctx: &MessageContext) -> CommResult<Vec<u8>> {
        match self {
            Self::Command(p) => p.encode_query(ctx),
            Self::State(p) => p.encode_query(ctx),
        }
    }

    fn decode_query(&mut self, response: &[u8]) -> CommResult<()> {
        match self {
            Self::Command(p) => p.decode_query(response),
            Self::State(p) => p.decode_query(response),
        }
    }

    fn encode_store(&self, ctx: &MessageContext) -> CommResult<Vec<u8>> {
        match self {
            Self::Command(p) => p.encode_store(ctx),
            Self::State(p) => p.encode_store(ctx),
        }
    }

    fn decode_store(&mut self, response: &[u8]) -> CommResult<()> {
        match self {
            Self::Command(p) => p.decode_store(response),
            Self::State(p) => p.decode_store(response),
        }
    }
}

impl From<CommandProperty> for CbwProperty {
    fn from(p: CommandProperty) -> Self {
        Self::Command(p)
    }
}

impl From<StateProperty> for CbwProperty {
    fn from(p: StateProperty) -> Self {
        Self::State(p)
    }
}

impl fmt::Display for CbwProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(p) => p.fmt(f),
            Self::State(p) => p.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const DOC: &str = "<datavalues><relay1state>1</relay1state><relay2state>0</relay2state></datavalues>";

    fn ctx() -> MessageContext {
        MessageContext::new(0, Duration::from_millis(100))
    }

    #[test]
    fn test_command_path() {
        let path = CommandProperty::new(3, true).encode_store(&ctx()).unwrap();
        assert_eq!(path, b"/state.xml?relay3State=1".to_vec());
        assert!(CommandProperty::new(3, true).encode_query(&ctx()).is_err());
    }

    #[test]
    fn test_relay_state_parse() {
        assert!(relay_state(DOC, 1).unwrap());
        assert!(!relay_state(DOC, 2).unwrap());
        assert_eq!(relay_state(DOC, 3).unwrap_err().protocol_reason(), Some("RELAY"));
        let bad = "<relay1state>x</relay1state>";
        assert_eq!(relay_state(bad, 1).unwrap_err().protocol_reason(), Some("RELAY VALUE"));
    }

    #[test]
    fn test_state_decode() {
        let mut prop = StateProperty::new(2);
        prop.decode_query(DOC.as_bytes()).unwrap();
        assert_eq!(prop.is_on(), Some(false));
    }

    #[test]
    fn test_command_decode_checks_echo() {
        let mut prop = CommandProperty::new(2, true);
        let err = prop.decode_store(DOC.as_bytes()).unwrap_err();
        assert_eq!(err.protocol_reason(), Some("RELAY VALUE"));

        let mut prop = CommandProperty::new(1, true);
        assert!(prop.decode_store(DOC.as_bytes()).is_ok());
        assert!(prop.decode_store(b"").is_ok());
    }
}
