// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Serial port messenger built on `tokio-serial`.
//!
//! Line settings default to 9600 8N1, the most common setting for roadside
//! controllers, and can be overridden from the link URI query.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_serial::{
    ClearBuffer, DataBits as SerialDataBits, Parity as SerialParity, SerialPort,
    SerialPortBuilderExt, SerialStream, StopBits as SerialStopBits,
};

use wayside_core::{CommError, CommResult, Messenger, TransportState};

use crate::stream;

// =============================================================================
// Line settings
// =============================================================================

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

impl DataBits {
    /// Returns the number of bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }

    /// Parses a bit count.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            7 => Some(Self::Seven),
            8 => Some(Self::Eight),
            _ => None,
        }
    }

    fn to_serial(self) -> SerialDataBits {
        match self {
            Self::Five => SerialDataBits::Five,
            Self::Six => SerialDataBits::Six,
            Self::Seven => SerialDataBits::Seven,
            Self::Eight => SerialDataBits::Eight,
        }
    }
}

/// Parity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

impl Parity {
    /// Returns the conventional one letter code (`N`, `O`, `E`).
    pub const fn char(&self) -> char {
        match self {
            Self::None => 'N',
            Self::Odd => 'O',
            Self::Even => 'E',
        }
    }

    fn to_serial(self) -> SerialParity {
        match self {
            Self::None => SerialParity::None,
            Self::Odd => SerialParity::Odd,
            Self::Even => SerialParity::Even,
        }
    }
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "n" | "none" => Ok(Self::None),
            "o" | "odd" => Ok(Self::Odd),
            "e" | "even" => Ok(Self::Even),
            other => Err(format!("unknown parity '{}'", other)),
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,
    /// Two stop bits.
    Two,
}

impl StopBits {
    /// Returns the number of stop bits.
    pub const fn bits(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    fn to_serial(self) -> SerialStopBits {
        match self {
            Self::One => SerialStopBits::One,
            Self::Two => SerialStopBits::Two,
        }
    }
}

/// Settings of a serial link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyS0`.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Write deadline.
    pub write_timeout: Duration,
}

impl SerialSettings {
    /// Creates 8N1 settings.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            write_timeout: Duration::from_secs(2),
        }
    }

    /// Sets the data bits.
    pub fn with_data_bits(mut self, bits: DataBits) -> Self {
        self.data_bits = bits;
        self
    }

    /// Sets the parity.
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Sets the stop bits.
    pub fn with_stop_bits(mut self, bits: StopBits) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Opens the port described by these settings.
    pub fn open(&self) -> CommResult<SerialStream> {
        tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(self.data_bits.to_serial())
            .parity(self.parity.to_serial())
            .stop_bits(self.stop_bits.to_serial())
            .open_native_async()
            .map_err(|e| map_open_error(&self.port, e))
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}{}",
            self.port,
            self.baud_rate,
            self.data_bits.bits(),
            self.parity.char(),
            self.stop_bits.bits()
        )
    }
}

fn map_open_error(port: &str, e: tokio_serial::Error) -> CommError {
    let message = match e.kind() {
        tokio_serial::ErrorKind::NoDevice => format!("serial port {} not found", port),
        tokio_serial::ErrorKind::InvalidInput => format!("invalid settings for {}", port),
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            format!("access to {} denied", port)
        }
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            format!("serial port {} not found", port)
        }
        _ => format!("cannot open {}", port),
    };
    CommError::connection_failed_with(message, e)
}

// =============================================================================
// SerialMessenger
// =============================================================================

/// A messenger over one serial port.
pub struct SerialMessenger {
    settings: SerialSettings,
    port: Option<SerialStream>,
    state: TransportState,
}

impl SerialMessenger {
    /// Creates a closed messenger.
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
            state: TransportState::Disconnected,
        }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn port(&mut self) -> CommResult<&mut SerialStream> {
        self.port.as_mut().ok_or(CommError::NotConnected)
    }

    fn mark<T>(&mut self, result: CommResult<T>) -> CommResult<T> {
        if matches!(result, Err(ref e) if e.requires_reconnect()) {
            self.state = TransportState::Error;
        }
        result
    }
}

impl fmt::Debug for SerialMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialMessenger")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish()
    }
}

#[async_trait]
impl Messenger for SerialMessenger {
    fn display_name(&self) -> String {
        format!("serial://{}", self.settings.port)
    }

    fn state(&self) -> TransportState {
        self.state
    }

    async fn open(&mut self) -> CommResult<()> {
        if self.state == TransportState::Connected {
            return Ok(());
        }
        self.state = TransportState::Connecting;
        match self.settings.open() {
            Ok(port) => {
                self.port = Some(port);
                self.state = TransportState::Connected;
                tracing::debug!(port = %self.settings, "Serial port opened");
                Ok(())
            }
            Err(e) => {
                self.state = TransportState::Error;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        self.port = None;
        self.state = TransportState::Disconnected;
    }

    async fn write(&mut self, bytes: &[u8]) -> CommResult<()> {
        let deadline = self.settings.write_timeout;
        let result = match self.port() {
            Ok(port) => stream::write_all(port, bytes, deadline).await,
            Err(e) => Err(e),
        };
        self.mark(result)
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> CommResult<usize> {
        let result = match self.port() {
            Ok(port) => stream::read_some(port, buf, timeout).await,
            Err(e) => Err(e),
        };
        self.mark(result)
    }

    async fn discard_input(&mut self) -> CommResult<()> {
        let port = self.port()?;
        port.clear(ClearBuffer::Input)
            .map_err(|e| CommError::read_failed_with("cannot clear input buffer", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_display() {
        let settings = SerialSettings::new("/dev/ttyS0", 9600)
            .with_parity(Parity::Even)
            .with_stop_bits(StopBits::Two)
            .with_data_bits(DataBits::Seven);
        assert_eq!(settings.to_string(), "/dev/ttyS0 9600 7E2");
    }

    #[test]
    fn test_parse_line_settings() {
        assert_eq!("E".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("none".parse::<Parity>().unwrap(), Parity::None);
        assert!("mark".parse::<Parity>().is_err());
        assert_eq!(DataBits::from_bits(7), Some(DataBits::Seven));
        assert_eq!(DataBits::from_bits(9), None);
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let mut messenger = SerialMessenger::new(SerialSettings::new("/dev/wayside-missing-port", 9600));
        let err = messenger.open().await.unwrap_err();
        assert!(err.requires_reconnect());
        assert_eq!(messenger.state(), TransportState::Error);

        messenger.close().await;
        assert_eq!(messenger.state(), TransportState::Disconnected);
        assert!(matches!(messenger.read(&mut [0u8; 1], Duration::from_millis(1)).await, Err(CommError::NotConnected)));
    }
}
