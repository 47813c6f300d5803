// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error taxonomy for the communication engine.
//!
//! Every failure an operation can meet on a comm link is expressed as a
//! [`CommError`]. The variants are grouped into four categories that drive
//! the engine's reactions:
//!
//! ```text
//! CommError
//! ├── Transport            - connect/read/write failure, timeouts (retried)
//! ├── Protocol             - malformed or checksum-mismatched response (retried)
//! ├── ResourceUnavailable  - no modem line free (deferred, never counted)
//! └── Controller           - device reported an explicit error (terminal)
//! ```
//!
//! Errors never escape a poller. The poller translates them into an
//! operation outcome and a controller status update.
//!
//! # Examples
//!
//! ```
//! use wayside_core::error::{CommError, ErrorCategory};
//! use std::time::Duration;
//!
//! let error = CommError::timeout(Duration::from_secs(2));
//! assert!(error.is_retryable());
//! assert_eq!(error.category(), ErrorCategory::Transport);
//!
//! let error = CommError::protocol_detail("DATA LEN", 6);
//! assert_eq!(error.protocol_reason(), Some("DATA LEN"));
//! assert_eq!(error.to_string(), "Protocol error: DATA LEN: 6");
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// ErrorCategory
// =============================================================================

/// Coarse classification of a [`CommError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connect, read, or write failure on the transport.
    Transport,
    /// The response could not be validated.
    Protocol,
    /// A shared resource (modem line) was not available.
    ResourceUnavailable,
    /// The device answered with an explicit error.
    Controller,
    /// The engine aborted the operation (step limit, unsupported request).
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Protocol => write!(f, "protocol"),
            Self::ResourceUnavailable => write!(f, "resource_unavailable"),
            Self::Controller => write!(f, "controller"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

// =============================================================================
// CommError
// =============================================================================

/// Errors raised while exchanging messages with a controller.
#[derive(Debug, Error)]
pub enum CommError {
    /// The transport could not be opened.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Reading from the transport failed.
    #[error("Read failed: {message}")]
    ReadFailed {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Writing to the transport failed.
    #[error("Write failed: {message}")]
    WriteFailed {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An exchange did not complete before its deadline.
    #[error("Timed out after {duration:?}")]
    Timeout {
        /// The deadline that expired.
        duration: Duration,
    },

    /// The messenger is not open.
    #[error("Messenger is not open")]
    NotConnected,

    /// The response failed validation.
    #[error("Protocol error: {}", format_reason(.reason, .detail.as_deref()))]
    Protocol {
        /// Short diagnostic tag such as `DATA LEN` or `CHECKSUM`.
        reason: String,
        /// Optional context (the value that was seen).
        detail: Option<String>,
    },

    /// A shared resource could not be checked out.
    #[error("Resource unavailable: {resource}")]
    ResourceUnavailable {
        /// Description of the exhausted resource.
        resource: String,
    },

    /// The controller reported an explicit error.
    #[error("Controller error: {message}")]
    Controller {
        /// Device specific error code, when the protocol carries one.
        code: Option<i64>,
        /// Error message.
        message: String,
    },

    /// The request is not supported by the property or codec.
    #[error("Unsupported: {message}")]
    Unsupported {
        /// Error message.
        message: String,
    },

    /// The engine gave up on the operation.
    #[error("Aborted: {reason}")]
    Aborted {
        /// Why the operation was aborted.
        reason: String,
    },
}

fn format_reason(reason: &str, detail: Option<&str>) -> String {
    match detail {
        Some(detail) => format!("{}: {}", reason, detail),
        None => reason.to_string(),
    }
}

impl CommError {
    /// Creates a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a connection failed error with a source.
    pub fn connection_failed_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a read failed error.
    pub fn read_failed(message: impl Into<String>) -> Self {
        Self::ReadFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a read failed error with a source.
    pub fn read_failed_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ReadFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a write failed error.
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a write failed error with a source.
    pub fn write_failed_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WriteFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Creates a protocol error with a bare reason.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
            detail: None,
        }
    }

    /// Creates a protocol error with a reason and the offending value.
    pub fn protocol_detail(reason: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self::Protocol {
            reason: reason.into(),
            detail: Some(detail.to_string()),
        }
    }

    /// Creates a resource unavailable error.
    pub fn resource_unavailable(resource: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            resource: resource.into(),
        }
    }

    /// Creates a controller error.
    pub fn controller(message: impl Into<String>) -> Self {
        Self::Controller {
            code: None,
            message: message.into(),
        }
    }

    /// Creates a controller error carrying a device error code.
    pub fn controller_code(code: i64, message: impl Into<String>) -> Self {
        Self::Controller {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Creates an unsupported request error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Creates an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Returns the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionFailed { .. }
            | Self::ReadFailed { .. }
            | Self::WriteFailed { .. }
            | Self::Timeout { .. }
            | Self::NotConnected => ErrorCategory::Transport,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::ResourceUnavailable { .. } => ErrorCategory::ResourceUnavailable,
            Self::Controller { .. } => ErrorCategory::Controller,
            Self::Unsupported { .. } | Self::Aborted { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns `true` if the failed exchange may be retried within the
    /// operation's retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Protocol
        )
    }

    /// Returns `true` if the messenger must be reopened before the next exchange.
    ///
    /// A timeout leaves the session usable: stale input is discarded before
    /// the next exchange, so a slow reply never forces a redial.
    pub fn requires_reconnect(&self) -> bool {
        self.category() == ErrorCategory::Transport && !self.is_timeout()
    }

    /// Returns `true` if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if a shared resource was exhausted.
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(self, Self::ResourceUnavailable { .. })
    }

    /// Returns `true` if this failure counts against the controller's
    /// consecutive failure counter.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::Controller | ErrorCategory::ResourceUnavailable
        )
    }

    /// Returns the diagnostic reason if this is a protocol error.
    pub fn protocol_reason(&self) -> Option<&str> {
        match self {
            Self::Protocol { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Returns a stable identifier for logging and events.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::ReadFailed { .. } => "read_failed",
            Self::WriteFailed { .. } => "write_failed",
            Self::Timeout { .. } => "timeout",
            Self::NotConnected => "not_connected",
            Self::Protocol { .. } => "protocol",
            Self::ResourceUnavailable { .. } => "resource_unavailable",
            Self::Controller { .. } => "controller",
            Self::Unsupported { .. } => "unsupported",
            Self::Aborted { .. } => "aborted",
        }
    }
}

impl Clone for CommError {
    fn clone(&self) -> Self {
        match self {
            Self::ConnectionFailed { message, .. } => Self::ConnectionFailed {
                message: message.clone(),
                source: None,
            },
            Self::ReadFailed { message, .. } => Self::ReadFailed {
                message: message.clone(),
                source: None,
            },
            Self::WriteFailed { message, .. } => Self::WriteFailed {
                message: message.clone(),
                source: None,
            },
            Self::Timeout { duration } => Self::Timeout {
                duration: *duration,
            },
            Self::NotConnected => Self::NotConnected,
            Self::Protocol { reason, detail } => Self::Protocol {
                reason: reason.clone(),
                detail: detail.clone(),
            },
            Self::ResourceUnavailable { resource } => Self::ResourceUnavailable {
                resource: resource.clone(),
            },
            Self::Controller { code, message } => Self::Controller {
                code: *code,
                message: message.clone(),
            },
            Self::Unsupported { message } => Self::Unsupported {
                message: message.clone(),
            },
            Self::Aborted { reason } => Self::Aborted {
                reason: reason.clone(),
            },
        }
    }
}

impl From<std::io::Error> for CommError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout {
                duration: Duration::ZERO,
            },
            std::io::ErrorKind::NotConnected => Self::NotConnected,
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof => Self::read_failed_with("connection lost", err),
            _ => Self::connection_failed_with("I/O error", err),
        }
    }
}

/// Result alias for engine operations.
pub type CommResult<T> = Result<T, CommError>;

// =============================================================================
// EnqueueError
// =============================================================================

/// Errors returned when an operation cannot be handed to a poller.
///
/// These are never fatal. The rejected operation is finished as cancelled
/// and the caller decides whether to log or ignore the rejection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The poller's inbox is at capacity.
    #[error("Queue for link '{link}' is full, dropped '{operation}'")]
    Full {
        /// Link identifier.
        link: String,
        /// Name of the dropped operation.
        operation: String,
    },

    /// The poller has shut down.
    #[error("Poller for link '{link}' is closed")]
    Closed {
        /// Link identifier.
        link: String,
    },

    /// No link owns the target controller.
    #[error("No link owns controller '{controller}'")]
    UnknownController {
        /// Controller identifier.
        controller: String,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            CommError::connection_failed("refused").category(),
            ErrorCategory::Transport
        );
        assert_eq!(CommError::protocol("CRC").category(), ErrorCategory::Protocol);
        assert_eq!(
            CommError::resource_unavailable("NO MODEM AVAILABLE").category(),
            ErrorCategory::ResourceUnavailable
        );
        assert_eq!(
            CommError::controller_code(2, "NO SUCH NAME").category(),
            ErrorCategory::Controller
        );
        assert_eq!(CommError::aborted("STEP LIMIT").category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_retryable() {
        assert!(CommError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(CommError::protocol("SUB CMD").is_retryable());
        assert!(!CommError::controller("bad request").is_retryable());
        assert!(!CommError::resource_unavailable("modem").is_retryable());
    }

    #[test]
    fn test_failure_counting() {
        assert!(CommError::NotConnected.counts_as_failure());
        assert!(CommError::protocol("CHECKSUM").counts_as_failure());
        assert!(!CommError::controller("HTTP 500").counts_as_failure());
        assert!(!CommError::resource_unavailable("modem").counts_as_failure());
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(
            CommError::protocol("SUB CMD").to_string(),
            "Protocol error: SUB CMD"
        );
        assert_eq!(
            CommError::protocol_detail("DATA LEN", 6).to_string(),
            "Protocol error: DATA LEN: 6"
        );
    }

    #[test]
    fn test_clone_drops_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = CommError::write_failed_with("socket", io);
        let cloned = err.clone();
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&cloned).is_none());
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_from_io_error() {
        let err: CommError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(err.requires_reconnect());
        let err: CommError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_timeout_keeps_session() {
        let timeout = CommError::timeout(Duration::from_millis(250));
        assert!(timeout.is_retryable());
        assert!(timeout.counts_as_failure());
        assert!(!timeout.requires_reconnect());

        assert!(CommError::NotConnected.requires_reconnect());
        assert!(CommError::read_failed("reset").requires_reconnect());
        assert!(!CommError::protocol("CHECKSUM").requires_reconnect());
    }
}
