// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Command-line interface.
//!
//! - `run`: start the node (default)
//! - `validate`: check a configuration file
//! - `version`: show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use wayside_config::LoggingConfig;

// =============================================================================
// Main CLI Structure
// =============================================================================

/// Wayside comm node: polls and commands roadside field devices.
#[derive(Parser, Debug)]
#[command(
    name = "wayside",
    author = "Sylvex <contact@sylvex.io>",
    version = wayside_core::VERSION,
    about = "Roadside device communication middleware",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "wayside.yaml", env = "WAYSIDE_CONFIG", global = true)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the file.
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format. Overrides the file.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start polling the configured links
    ///
    /// This is the default command when no subcommand is given.
    Run(RunArgs),

    /// Validate the configuration file without starting
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

/// Arguments for the `run` command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Start the links but do not schedule periodic polls
    #[arg(long)]
    pub no_poll: bool,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ValidateArgs {
    /// Output format for the result
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Compact single line
    Compact,
}

impl From<wayside_config::LogFormat> for LogFormat {
    fn from(format: wayside_config::LogFormat) -> Self {
        match format {
            wayside_config::LogFormat::Text => LogFormat::Text,
            wayside_config::LogFormat::Json => LogFormat::Json,
            wayside_config::LogFormat::Compact => LogFormat::Compact,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parses the process arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the command to run, `run` when none was given.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Resolves the log level: flags, then `--log-level`, then the file.
    pub fn effective_log_level(&self, file: Option<&LoggingConfig>) -> String {
        if self.quiet {
            "warn".to_string()
        } else if self.verbose {
            "debug".to_string()
        } else if let Some(level) = &self.log_level {
            level.clone()
        } else {
            file.map(|l| l.level.as_str()).unwrap_or("info").to_string()
        }
    }

    /// Resolves the log format: `--log-format`, then the file.
    pub fn effective_log_format(&self, file: Option<&LoggingConfig>) -> LogFormat {
        self.log_format
            .or_else(|| file.map(|l| l.format.into()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayside_config::LogLevel;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["wayside"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run(_)));
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["wayside", "validate", "--format", "json", "--strict"]);
        match cli.command {
            Some(Commands::Validate(args)) => {
                assert_eq!(args.format, OutputFormat::Json);
                assert!(args.strict);
            }
            other => panic!("expected validate, got {:?}", other),
        }
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["wayside", "-c", "/etc/wayside/node.toml", "run", "--no-poll"]);
        assert_eq!(cli.config, PathBuf::from("/etc/wayside/node.toml"));
        assert!(matches!(cli.command, Some(Commands::Run(RunArgs { no_poll: true }))));
    }

    #[test]
    fn test_log_level_precedence() {
        let file = LoggingConfig {
            level: LogLevel::Error,
            format: wayside_config::LogFormat::Json,
        };
        let cli = Cli::parse_from(["wayside"]);
        assert_eq!(cli.effective_log_level(Some(&file)), "error");
        assert_eq!(cli.effective_log_level(None), "info");
        assert_eq!(cli.effective_log_format(Some(&file)), LogFormat::Json);

        let cli = Cli::parse_from(["wayside", "-l", "trace", "--log-format", "compact"]);
        assert_eq!(cli.effective_log_level(Some(&file)), "trace");
        assert_eq!(cli.effective_log_format(Some(&file)), LogFormat::Compact);

        let cli = Cli::parse_from(["wayside", "-q", "-l", "trace"]);
        assert_eq!(cli.effective_log_level(Some(&file)), "warn");
    }
}
