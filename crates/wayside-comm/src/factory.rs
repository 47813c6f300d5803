// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Builds messengers from link URIs.
//!
//! | URI                                         | Messenger          |
//! |---------------------------------------------|--------------------|
//! | `tcp://host:port`                           | [`TcpMessenger`]   |
//! | `serial:///dev/ttyS0?baud=9600&parity=even` | [`SerialMessenger`]|
//! | `modem:5551234`                             | [`ModemMessenger`] |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use wayside_core::Messenger;

use crate::modem::{LineConnector, ModemMessenger, ModemPool, SerialLineConnector};
use crate::serial::{DataBits, Parity, SerialMessenger, SerialSettings, StopBits};
use crate::tcp::{TcpMessenger, TcpSettings};

/// Default baud rate of serial links.
pub const DEFAULT_BAUD: u32 = 9600;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while parsing a link URI or building its messenger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    /// The scheme is not `tcp`, `serial` or `modem`.
    #[error("Unsupported URI scheme in '{0}'")]
    UnsupportedScheme(String),

    /// The URI is malformed.
    #[error("Invalid URI '{uri}': {reason}")]
    Invalid {
        /// The offending URI.
        uri: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A modem URI was given but no modem pool is configured.
    #[error("Link '{0}' dials a modem but the modem pool is empty")]
    NoModemPool(String),
}

impl UriError {
    fn invalid(uri: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// LinkUri
// =============================================================================

/// A parsed link URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkUri {
    /// TCP socket.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port.
        port: u16,
    },
    /// Serial port.
    Serial(SerialSettings),
    /// Dial-up through the modem pool.
    Modem {
        /// Number to dial.
        phone: String,
    },
}

impl LinkUri {
    /// Returns the URI scheme.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Serial(_) => "serial",
            Self::Modem { .. } => "modem",
        }
    }

    /// Returns `true` for a dial-up URI.
    pub fn is_modem(&self) -> bool {
        matches!(self, Self::Modem { .. })
    }
}

impl FromStr for LinkUri {
    type Err = UriError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let uri = uri.trim();
        if let Some(rest) = uri.strip_prefix("tcp://") {
            return parse_tcp(uri, rest);
        }
        if let Some(rest) = uri.strip_prefix("serial://") {
            return parse_serial(uri, rest);
        }
        if let Some(rest) = uri.strip_prefix("modem:") {
            let phone = rest.trim_start_matches("//");
            if phone.is_empty() || !phone.chars().all(|c| c.is_ascii_digit() || ",*#-".contains(c)) {
                return Err(UriError::invalid(uri, "phone number must be digits"));
            }
            return Ok(Self::Modem {
                phone: phone.to_string(),
            });
        }
        Err(UriError::UnsupportedScheme(uri.to_string()))
    }
}

fn parse_tcp(uri: &str, rest: &str) -> Result<LinkUri, UriError> {
    let rest = rest.trim_end_matches('/');
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| UriError::invalid(uri, "missing port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(UriError::invalid(uri, "missing host"));
    }
    let port = port
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| UriError::invalid(uri, format!("bad port '{}'", port)))?;
    Ok(LinkUri::Tcp {
        host: host.to_string(),
        port,
    })
}

fn parse_serial(uri: &str, rest: &str) -> Result<LinkUri, UriError> {
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    if !path.starts_with('/') || path.len() < 2 {
        return Err(UriError::invalid(uri, "serial path must be absolute"));
    }
    let mut settings = SerialSettings::new(path, DEFAULT_BAUD);
    for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| UriError::invalid(uri, format!("bad query '{}'", pair)))?;
        match key {
            "baud" => {
                settings.baud_rate = value
                    .parse()
                    .ok()
                    .filter(|b| *b > 0)
                    .ok_or_else(|| UriError::invalid(uri, format!("bad baud '{}'", value)))?;
            }
            "data_bits" => {
                settings.data_bits = value
                    .parse()
                    .ok()
                    .and_then(DataBits::from_bits)
                    .ok_or_else(|| UriError::invalid(uri, format!("bad data bits '{}'", value)))?;
            }
            "parity" => {
                settings.parity = value.parse::<Parity>().map_err(|e| UriError::invalid(uri, e))?;
            }
            "stop_bits" => {
                settings.stop_bits = match value {
                    "1" => StopBits::One,
                    "2" => StopBits::Two,
                    _ => return Err(UriError::invalid(uri, format!("bad stop bits '{}'", value))),
                };
            }
            other => return Err(UriError::invalid(uri, format!("unknown option '{}'", other))),
        }
    }
    Ok(LinkUri::Serial(settings))
}

impl fmt::Display for LinkUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Self::Serial(s) => write!(f, "serial://{}?baud={}", s.port, s.baud_rate),
            Self::Modem { phone } => write!(f, "modem:{}", phone),
        }
    }
}

// =============================================================================
// MessengerFactory
// =============================================================================

/// Builds boxed messengers for links.
#[derive(Clone)]
pub struct MessengerFactory {
    modem_pool: Option<Arc<ModemPool>>,
    line_connector: Arc<dyn LineConnector>,
    connect_timeout: Duration,
}

impl MessengerFactory {
    /// Creates a factory without a modem pool.
    pub fn new() -> Self {
        Self {
            modem_pool: None,
            line_connector: Arc::new(SerialLineConnector),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the shared modem pool.
    pub fn with_modem_pool(mut self, pool: Arc<ModemPool>) -> Self {
        self.modem_pool = Some(pool);
        self
    }

    /// Replaces how modem lines are opened.
    pub fn with_line_connector(mut self, connector: Arc<dyn LineConnector>) -> Self {
        self.line_connector = connector;
        self
    }

    /// Sets the default TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the modem pool.
    pub fn modem_pool(&self) -> Option<&Arc<ModemPool>> {
        self.modem_pool.as_ref()
    }

    /// Builds a messenger for `uri`.
    ///
    /// `connect_timeout` overrides the factory default for TCP links.
    pub fn build(
        &self,
        link: &str,
        uri: &LinkUri,
        connect_timeout: Option<Duration>,
    ) -> Result<Box<dyn Messenger>, UriError> {
        let messenger: Box<dyn Messenger> = match uri {
            LinkUri::Tcp { host, port } => Box::new(TcpMessenger::new(
                TcpSettings::new(host.clone(), *port)
                    .with_connect_timeout(connect_timeout.unwrap_or(self.connect_timeout)),
            )),
            LinkUri::Serial(settings) => Box::new(SerialMessenger::new(settings.clone())),
            LinkUri::Modem { phone } => {
                let pool = self
                    .modem_pool
                    .as_ref()
                    .filter(|p| p.size() > 0)
                    .ok_or_else(|| UriError::NoModemPool(link.to_string()))?;
                Box::new(ModemMessenger::new(
                    phone.clone(),
                    pool.clone(),
                    self.line_connector.clone(),
                ))
            }
        };
        tracing::debug!(link = %link, messenger = %messenger.display_name(), "Messenger built");
        Ok(messenger)
    }

    /// Parses `uri` and builds its messenger.
    pub fn build_str(&self, link: &str, uri: &str) -> Result<Box<dyn Messenger>, UriError> {
        self.build(link, &uri.parse()?, None)
    }
}

impl Default for MessengerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessengerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessengerFactory")
            .field("modem_pool", &self.modem_pool)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::ModemSpec;

    #[test]
    fn test_parse_tcp() {
        let uri: LinkUri = "tcp://10.0.0.7:4001".parse().unwrap();
        assert_eq!(
            uri,
            LinkUri::Tcp {
                host: "10.0.0.7".to_string(),
                port: 4001
            }
        );
        assert_eq!(uri.to_string(), "tcp://10.0.0.7:4001");
        assert!("tcp://host".parse::<LinkUri>().is_err());
        assert!("tcp://host:0".parse::<LinkUri>().is_err());
        assert!("tcp://:80".parse::<LinkUri>().is_err());
    }

    #[test]
    fn test_parse_serial_query() {
        let uri: LinkUri = "serial:///dev/ttyS1?baud=19200&parity=even&stop_bits=2&data_bits=7"
            .parse()
            .unwrap();
        let LinkUri::Serial(settings) = uri else {
            panic!("expected serial");
        };
        assert_eq!(settings.port, "/dev/ttyS1");
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert_eq!(settings.data_bits, DataBits::Seven);

        let uri: LinkUri = "serial:///dev/ttyS0".parse().unwrap();
        assert!(matches!(uri, LinkUri::Serial(ref s) if s.baud_rate == DEFAULT_BAUD));

        assert!("serial:///dev/ttyS0?baud=fast".parse::<LinkUri>().is_err());
        assert!("serial:///dev/ttyS0?flow=rts".parse::<LinkUri>().is_err());
        assert!("serial://ttyS0".parse::<LinkUri>().is_err());
    }

    #[test]
    fn test_parse_modem() {
        let uri: LinkUri = "modem:5551234".parse().unwrap();
        assert!(uri.is_modem());
        assert_eq!(uri.scheme(), "modem");
        assert!("modem:".parse::<LinkUri>().is_err());
        assert!("modem:call-me".parse::<LinkUri>().is_err());
        assert!(matches!(
            "udp://host:1".parse::<LinkUri>(),
            Err(UriError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_build_messengers() {
        let factory = MessengerFactory::new();
        let tcp = factory.build_str("l1", "tcp://127.0.0.1:4001").unwrap();
        assert_eq!(tcp.display_name(), "tcp://127.0.0.1:4001");

        let err = factory.build_str("l2", "modem:5551234").err().expect("expected NoModemPool error");
        assert_eq!(err, UriError::NoModemPool("l2".to_string()));

        let factory = factory.with_modem_pool(ModemPool::new(vec![ModemSpec::new("m0", "/dev/ttyM0", 9600)]));
        let modem = factory.build_str("l2", "modem:5551234").unwrap();
        assert_eq!(modem.display_name(), "modem:5551234");
    }
}
