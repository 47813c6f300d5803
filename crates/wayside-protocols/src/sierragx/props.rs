// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Prompt-oriented modem properties.

use std::fmt;

use wayside_core::messenger::find;
use wayside_core::{CommError, CommResult, MessageContext, Property};

/// Location query command.
pub const GPS_QUERY: &str = "AT!GPSLOC?\r";

const PASSWORD_PROMPT: &[u8] = b"Password:";
const OK: &[u8] = b"OK";
const ERROR: &[u8] = b"ERROR";

/// A GPS position in signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    /// Latitude, negative south of the equator.
    pub lat: f64,
    /// Longitude, negative west of Greenwich.
    pub lon: f64,
}

/// Parses a `Lat:` or `Lon:` line value such as `44 Deg 58 Min 12.34 Sec N`.
///
/// `reason` tags the protocol error on malformed input.
pub fn parse_dms(value: &str, reason: &str) -> CommResult<f64> {
    let mut numbers = Vec::with_capacity(3);
    let mut hemisphere = None;
    for token in value.split_whitespace() {
        if let Ok(n) = token.parse::<f64>() {
            numbers.push(n);
            continue;
        }
        match token {
            "N" | "E" => hemisphere = Some(1.0),
            "S" | "W" => hemisphere = Some(-1.0),
            _ => {}
        }
        if hemisphere.is_some() {
            break;
        }
    }
    let (Some(sign), [deg, min, sec]) = (hemisphere, numbers.as_slice()) else {
        return Err(CommError::protocol_detail(reason, value.trim()));
    };
    if *min >= 60.0 || *sec >= 60.0 {
        return Err(CommError::protocol_detail(reason, value.trim()));
    }
    Ok(sign * (deg + min / 60.0 + sec / 3600.0))
}

fn field<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(name))
        .map(str::trim)
}

// =============================================================================
// SierraGxProperty
// =============================================================================

/// A Sierra GX cellular modem request.
#[derive(Clone, PartialEq)]
pub enum SierraGxProperty {
    /// Sends the login name and waits for the password prompt.
    Username(String),
    /// Sends the password and waits for `OK`.
    Password(String),
    /// Reads the GPS position.
    GpsLocation(Option<GpsFix>),
}

impl SierraGxProperty {
    /// Creates a location query.
    pub fn gps() -> Self {
        Self::GpsLocation(None)
    }

    /// Returns `true` once `received` holds the whole response.
    pub fn response_complete(&self, received: &[u8]) -> bool {
        match self {
            Self::Username(_) => find(received, PASSWORD_PROMPT).is_some(),
            Self::Password(_) | Self::GpsLocation(_) => {
                received
                    .split(|b| *b == b'\n')
                    .map(|line| line.trim_ascii())
                    .any(|line| line == OK || line.starts_with(ERROR))
                    || find(received, b"incorrect").is_some()
            }
        }
    }

    /// Returns the decoded position.
    pub fn fix(&self) -> Option<GpsFix> {
        match self {
            Self::GpsLocation(fix) => *fix,
            _ => None,
        }
    }

    fn command(&self) -> String {
        match self {
            Self::Username(name) => format!("{}\r", name),
            Self::Password(pw) => format!("{}\r", pw),
            Self::GpsLocation(_) => GPS_QUERY.to_string(),
        }
    }
}

impl Property for SierraGxProperty {
    fn encode_query(&self, _ctx: &MessageContext) -> CommResult<Vec<u8>> {
        Ok(self.command().into_bytes())
    }

    fn decode_query(&mut self, response: &[u8]) -> CommResult<()> {
        let text = String::from_utf8_lossy(response);
        match self {
            Self::Username(_) => {
                if text.contains("Password:") {
                    Ok(())
                } else {
                    Err(CommError::protocol("PASSWORD PROMPT"))
                }
            }
            Self::Password(_) => {
                let accepted = text.lines().any(|line| line.trim() == "OK");
                if accepted {
                    Ok(())
                } else {
                    Err(CommError::controller("LOGIN FAILED"))
                }
            }
            Self::GpsLocation(fix) => {
                if text.lines().any(|line| line.trim().starts_with("ERROR")) {
                    return Err(CommError::controller("GPS ERROR"));
                }
                let (Some(lat), Some(lon)) = (field(&text, "Lat:"), field(&text, "Lon:")) else {
                    return Err(CommError::controller("NO GPS FIX"));
                };
                *fix = Some(GpsFix {
                    lat: parse_dms(lat, "LAT")?,
                    lon: parse_dms(lon, "LON")?,
                });
                Ok(())
            }
        }
    }
}

impl fmt::Display for SierraGxProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username(name) => write!(f, "username {}", name),
            Self::Password(_) => write!(f, "password"),
            Self::GpsLocation(Some(fix)) => write!(f, "gps {:.6},{:.6}", fix.lat, fix.lon),
            Self::GpsLocation(None) => write!(f, "gps ?"),
        }
    }
}

impl fmt::Debug for SierraGxProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username(name) => f.debug_tuple("Username").field(name).finish(),
            Self::Password(_) => f.debug_tuple("Password").field(&"***").finish(),
            Self::GpsLocation(fix) => f.debug_tuple("GpsLocation").field(fix).finish(),
        }
    }
}
