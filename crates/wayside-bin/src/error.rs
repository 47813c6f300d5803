// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the binary.

use thiserror::Error;

use wayside_comm::UriError;
use wayside_config::ConfigError;
use wayside_core::LinkError;
use wayside_protocols::DriverError;

/// Result type alias for binary operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that stop the binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration problem found by a command.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Startup failed.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Failure while running.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Config loading error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Link registration error.
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Transport could not be built.
    #[error("Transport error: {0}")]
    Uri(#[from] UriError),

    /// Protocol without a driver.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Error with context.
    #[error("{context}: {source}")]
    WithContext {
        /// The context description.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an initialization error.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Creates a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Adds context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Config(_) => 1,
            Self::Initialization(_) | Self::Link(_) | Self::Uri(_) | Self::Driver(_) => 2,
            Self::Runtime(_) => 3,
            Self::Io(_) => 4,
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }
}

impl From<std::io::Error> for BinError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Prints an error and its cause chain to stderr.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }
}

/// Reports an error and exits with its code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayside_core::Protocol;

    #[test]
    fn test_error_with_context() {
        let err = BinError::config("inner").with_context("outer");
        assert_eq!(err.to_string(), "outer: Configuration error: inner");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BinError::init("x").exit_code(), 2);
        assert_eq!(BinError::runtime("x").exit_code(), 3);
        assert_eq!(BinError::from(DriverError::NotRegistered(Protocol::E6)).exit_code(), 2);
        assert_eq!(BinError::from(ConfigError::validation("node.name", "empty")).exit_code(), 1);
    }
}
