// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! E6 reader properties.
//!
//! Request data excludes the command group, which the codec prepends.
//! Response payloads include it, so field offsets below count from the
//! group's first byte.

use std::fmt;

use wayside_core::property::{parse8, parse16};
use wayside_core::{CommError, CommResult, MessageContext, Property};

/// Carriage return terminating RF transceiver requests.
const CR: u8 = 0x0D;

// =============================================================================
// CommandGroup
// =============================================================================

/// Command groups of the E6 protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandGroup {
    /// System information and settings.
    SystemInfo,
    /// RF transceiver settings.
    RfTransceiver,
}

impl CommandGroup {
    /// Returns the 16-bit group code.
    pub const fn code(self) -> u16 {
        match self {
            Self::SystemInfo => 0x4000,
            Self::RfTransceiver => 0x5000,
        }
    }

    /// Looks up a group by code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x4000 => Some(Self::SystemInfo),
            0x5000 => Some(Self::RfTransceiver),
            _ => None,
        }
    }
}

// =============================================================================
// AckTimeoutProp
// =============================================================================

/// Host protocol whose acknowledge timeout is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckProtocol {
    /// UDP/IP host link.
    UdpIp,
    /// Serial host link.
    Serial,
    /// Serial debug link.
    SerialDebug,
}

impl AckProtocol {
    /// Every host protocol, in ordinal order.
    pub const ALL: [AckProtocol; 3] = [Self::UdpIp, Self::Serial, Self::SerialDebug];

    /// Returns the wire ordinal.
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::UdpIp => 0,
            Self::Serial => 1,
            Self::SerialDebug => 2,
        }
    }

    /// Looks up a protocol by ordinal.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.ordinal() == ordinal)
    }

    /// Returns the configuration name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UdpIp => "udp_ip",
            Self::Serial => "serial",
            Self::SerialDebug => "serial_debug",
        }
    }
}

/// Data acknowledge timeout of one host protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckTimeoutProp {
    protocol: AckProtocol,
    timeout_ms: Option<u16>,
}

impl AckTimeoutProp {
    /// Store command code.
    pub const STORE: u16 = 0x0018;
    /// Query command code.
    pub const QUERY: u16 = 0x0019;

    /// Creates a property for querying.
    pub fn new(protocol: AckProtocol) -> Self {
        Self {
            protocol,
            timeout_ms: None,
        }
    }

    /// Creates a property for storing `timeout_ms`.
    pub fn with_timeout(protocol: AckProtocol, timeout_ms: u16) -> Self {
        Self {
            protocol,
            timeout_ms: Some(timeout_ms),
        }
    }

    /// Returns the host protocol.
    pub fn protocol(&self) -> AckProtocol {
        self.protocol
    }

    /// Returns the decoded timeout.
    pub fn timeout_ms(&self) -> Option<u16> {
        self.timeout_ms
    }
}

impl Property for AckTimeoutProp {
    fn encode_query(&self, _ctx: &MessageContext) -> CommResult<Vec<u8>> {
        let mut data = Self::QUERY.to_be_bytes().to_vec();
        data.push(self.protocol.ordinal());
        Ok(data)
    }

    fn decode_query(&mut self, response: &[u8]) -> CommResult<()> {
        if response.len() != 7 {
            return Err(CommError::protocol_detail("DATA LEN", response.len()));
        }
        if parse16(response, 2)? != Self::QUERY {
            return Err(CommError::protocol("SUB CMD"));
        }
        if AckProtocol::from_ordinal(parse8(response, 4)?) != Some(self.protocol) {
            return Err(CommError::protocol("PROTOCOL"));
        }
        self.timeout_ms = Some(parse16(response, 5)?);
        Ok(())
    }

    fn encode_store(&self, _ctx: &MessageContext) -> CommResult<Vec<u8>> {
        let timeout = self
            .timeout_ms
            .ok_or_else(|| CommError::unsupported("ack timeout store without a value"))?;
        let mut data = Self::STORE.to_be_bytes().to_vec();
        data.push(self.protocol.ordinal());
        data.extend_from_slice(&timeout.to_be_bytes());
        Ok(data)
    }
}

impl fmt::Display for AckTimeoutProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ack timeout: {} ms",
            self.protocol.as_str(),
            self.timeout_ms.unwrap_or_default()
        )
    }
}

// =============================================================================
// DataDetectProp
// =============================================================================

/// RF tag protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RfProtocol {
    /// SeGo tags.
    SeGo,
    /// IAG (E-ZPass) tags.
    Iag,
    /// ISO 18000-6C tags.
    SixC,
}

impl RfProtocol {
    /// Every RF protocol, in ordinal order.
    pub const ALL: [RfProtocol; 3] = [Self::SeGo, Self::Iag, Self::SixC];

    /// Returns the wire ordinal.
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::SeGo => 0,
            Self::Iag => 1,
            Self::SixC => 2,
        }
    }

    /// Looks up a protocol by ordinal.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.ordinal() == ordinal)
    }

    /// Returns the configuration name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SeGo => "sego",
            Self::Iag => "iag",
            Self::SixC => "6c",
        }
    }
}

/// Data detect threshold (0 to 20 dB) of one RF protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDetectProp {
    protocol: RfProtocol,
    value_db: Option<u8>,
}

impl DataDetectProp {
    /// Store command code.
    pub const STORE: u8 = 0x53;
    /// Query command code.
    pub const QUERY: u8 = 0x54;
    /// Largest valid threshold.
    pub const MAX_DB: u8 = 20;

    /// Creates a property for querying.
    pub fn new(protocol: RfProtocol) -> Self {
        Self {
            protocol,
            value_db: None,
        }
    }

    /// Creates a property for storing `value_db`.
    pub fn with_value(protocol: RfProtocol, value_db: u8) -> Self {
        Self {
            protocol,
            value_db: Some(value_db),
        }
    }

    /// Returns the RF protocol.
    pub fn protocol(&self) -> RfProtocol {
        self.protocol
    }

    /// Returns the decoded threshold.
    pub fn value_db(&self) -> Option<u8> {
        self.value_db
    }
}

impl Property for DataDetectProp {
    fn encode_query(&self, _ctx: &MessageContext) -> CommResult<Vec<u8>> {
        Ok(vec![Self::QUERY, self.protocol.ordinal() << 4, CR])
    }

    fn decode_query(&mut self, response: &[u8]) -> CommResult<()> {
        if response.len() != 7 {
            return Err(CommError::protocol_detail("DATA LEN", response.len()));
        }
        if parse8(response, 2)? != Self::QUERY {
            return Err(CommError::protocol("SUB CMD"));
        }
        if RfProtocol::from_ordinal(parse8(response, 3)? >> 4) != Some(self.protocol) {
            return Err(CommError::protocol("RF PROTOCOL"));
        }
        if parse8(response, 5)? != 0 {
            return Err(CommError::protocol("ACK"));
        }
        if parse8(response, 6)? != CR {
            return Err(CommError::protocol("CR"));
        }
        self.value_db = Some(parse8(response, 4)?);
        Ok(())
    }

    fn encode_store(&self, _ctx: &MessageContext) -> CommResult<Vec<u8>> {
        match self.value_db {
            Some(v) if v <= Self::MAX_DB => Ok(vec![Self::STORE, self.protocol.ordinal() << 4, v, CR]),
            Some(v) => Err(CommError::unsupported(format!("data detect {} dB out of range", v))),
            None => Err(CommError::unsupported("data detect store without a value")),
        }
    }
}

impl fmt::Display for DataDetectProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} data detect: {} dB",
            self.protocol.as_str(),
            self.value_db.unwrap_or_default()
        )
    }
}

// =============================================================================
// E6Property
// =============================================================================

/// Any property exchanged by the E6 codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum E6Property {
    /// Acknowledge timeout.
    AckTimeout(AckTimeoutProp),
    /// Data detect threshold.
    DataDetect(DataDetectProp),
}

impl E6Property {
    /// Returns the command group framing this property.
    pub fn group(&self) -> CommandGroup {
        match self {
            Self::AckTimeout(_) => CommandGroup::SystemInfo,
            Self::DataDetect(_) => CommandGroup::RfTransceiver,
        }
    }
}

impl Property for E6Property {
    fn encode_query(&self, ctx: &MessageContext) -> CommResult<Vec<u8>> {
        match self {
            Self::AckTimeout(p) => p.encode_query(ctx),
            Self::DataDetect(p) => p.encode_query(ctx),
        }
    }

    fn decode_query(&mut self, response: &[u8]) -> CommResult<()> {
        match self {
            Self::AckTimeout(p) => p.decode_query(response),
            Self::DataDetect(p) => p.decode_query(response),
        }
    }

    fn encode_store(&self, ctx: &MessageContext) -> CommResult<Vec<u8>> {
        match self {
            Self::AckTimeout(p) => p.encode_store(ctx),
            Self::DataDetect(p) => p.encode_store(ctx),
        }
    }
}

impl From<AckTimeoutProp> for E6Property {
    fn from(p: AckTimeoutProp) -> Self {
        Self::AckTimeout(p)
    }
}

impl From<DataDetectProp> for E6Property {
    fn from(p: DataDetectProp) -> Self {
        Self::DataDetect(p)
    }
}

impl fmt::Display for E6Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AckTimeout(p) => p.fmt(f),
            Self::DataDetect(p) => p.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ctx() -> MessageContext {
        MessageContext::new(1, Duration::from_millis(100))
    }

    #[test]
    fn test_ack_timeout_query_bytes() {
        let prop = AckTimeoutProp::new(AckProtocol::Serial);
        assert_eq!(prop.encode_query(&ctx()).unwrap(), vec![0x00, 0x19, 0x01]);
    }

    #[test]
    fn test_ack_timeout_decode() {
        let mut prop = AckTimeoutProp::new(AckProtocol::Serial);
        prop.decode_query(&[0x40, 0x00, 0x00, 0x19, 0x01, 0x00, 0xFA]).unwrap();
        assert_eq!(prop.timeout_ms(), Some(250));
        assert_eq!(prop.to_string(), "serial ack timeout: 250 ms");
    }

    #[test]
    fn test_ack_timeout_rejects_malformed() {
        let mut prop = AckTimeoutProp::new(AckProtocol::Serial);
        let err = prop.decode_query(&[0x40, 0x00, 0x00, 0x19, 0x01, 0x00]).unwrap_err();
        assert_eq!(err.protocol_reason(), Some("DATA LEN"));
        assert_eq!(err.to_string(), "Protocol error: DATA LEN: 6");

        let err = prop
            .decode_query(&[0x40, 0x00, 0x00, 0x18, 0x01, 0x00, 0xFA])
            .unwrap_err();
        assert_eq!(err.protocol_reason(), Some("SUB CMD"));

        let err = prop
            .decode_query(&[0x40, 0x00, 0x00, 0x19, 0x02, 0x00, 0xFA])
            .unwrap_err();
        assert_eq!(err.protocol_reason(), Some("PROTOCOL"));
        assert_eq!(prop.timeout_ms(), None);
    }

    #[test]
    fn test_ack_timeout_store() {
        let prop = AckTimeoutProp::with_timeout(AckProtocol::UdpIp, 0x0102);
        assert_eq!(prop.encode_store(&ctx()).unwrap(), vec![0x00, 0x18, 0x00, 0x01, 0x02]);
        assert!(AckTimeoutProp::new(AckProtocol::UdpIp).encode_store(&ctx()).is_err());
    }

    #[test]
    fn test_data_detect_round_trip() {
        let mut prop = DataDetectProp::new(RfProtocol::SixC);
        assert_eq!(prop.encode_query(&ctx()).unwrap(), vec![0x54, 0x20, 0x0D]);
        prop.decode_query(&[0x50, 0x00, 0x54, 0x20, 12, 0x00, 0x0D]).unwrap();
        assert_eq!(prop.value_db(), Some(12));
    }

    #[test]
    fn test_data_detect_rejects_malformed() {
        let mut prop = DataDetectProp::new(RfProtocol::Iag);
        let cases: [(&[u8], &str); 4] = [
            (&[0x50, 0x00, 0x54, 0x00, 12, 0x00, 0x0D], "RF PROTOCOL"),
            (&[0x50, 0x00, 0x54, 0x10, 12, 0x01, 0x0D], "ACK"),
            (&[0x50, 0x00, 0x54, 0x10, 12, 0x00, 0x0A], "CR"),
            (&[0x50, 0x00, 0x53, 0x10, 12, 0x00, 0x0D], "SUB CMD"),
        ];
        for (response, reason) in cases {
            let err = prop.decode_query(response).unwrap_err();
            assert_eq!(err.protocol_reason(), Some(reason));
        }
        assert_eq!(prop.value_db(), None);
    }

    #[test]
    fn test_data_detect_store_range() {
        assert!(DataDetectProp::with_value(RfProtocol::SeGo, 20).encode_store(&ctx()).is_ok());
        assert!(DataDetectProp::with_value(RfProtocol::SeGo, 21).encode_store(&ctx()).is_err());
    }

    #[test]
    fn test_enum_delegates() {
        let mut prop = E6Property::from(AckTimeoutProp::new(AckProtocol::Serial));
        assert_eq!(prop.group(), CommandGroup::SystemInfo);
        assert_eq!(prop.encode_query(&ctx()).unwrap(), vec![0x00, 0x19, 0x01]);
        prop.decode_query(&[0x40, 0x00, 0x00, 0x19, 0x01, 0x01, 0x00]).unwrap();
        assert!(matches!(prop, E6Property::AckTimeout(ref p) if p.timeout_ms() == Some(256)));
    }
}
