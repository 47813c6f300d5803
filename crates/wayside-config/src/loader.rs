// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Substitute `${VAR}` / `${VAR:default}` placeholders
//! 3. Deserialize (YAML, TOML, or JSON)
//! 4. Apply environment variable overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! WAYSIDE_NODE_NAME=depot-7
//! WAYSIDE_LOG_LEVEL=debug
//! WAYSIDE_LINKS_0_ENABLED=false
//! WAYSIDE_LINKS_0_URI=tcp://10.0.0.9:80
//! WAYSIDE_LINKS_0_RETRIES=5
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{LogLevel, WaysideConfig};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "WAYSIDE";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads and validates a [`WaysideConfig`].
///
/// ```no_run
/// use wayside_config::loader::ConfigLoader;
///
/// let config = ConfigLoader::new().load("wayside.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
    /// Variables consulted instead of the process environment.
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Creates a loader reading the process environment.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
            env: None,
        }
    }

    /// Creates a builder.
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder::new()
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholders and overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Uses `vars` in place of the process environment.
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    /// Loads configuration from a file.
    ///
    /// `.yaml`/`.yml`, `.toml`, and `.json` are accepted.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<WaysideConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let config = self.process(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            ConfigError::Parse { message, line, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
                line,
            },
            other => other,
        })?;

        info!("Configuration loaded successfully");
        debug!(
            links = config.links.len(),
            controllers = config.controller_count(),
            modems = config.modem_pool.modems.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<WaysideConfig> {
        self.process(content, format)
    }

    fn process(&self, content: &str, format: ConfigFormat) -> ConfigResult<WaysideConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };
        let mut config: WaysideConfig = parse_str(&content, format)?;
        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    fn var(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(vars) => vars.get(name).cloned(),
            None => env::var(name).ok(),
        }
    }

    /// Substitutes `${VAR_NAME}` and `${VAR_NAME:default}`.
    ///
    /// Unknown variables without a default are left in place.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                result.push_str(&rest[start..]);
                return result;
            };
            let body = &after[..end];
            let (name, default) = match body.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (body, None),
            };
            match (self.var(name), default) {
                (Some(value), _) => result.push_str(&value),
                (None, Some(default)) => result.push_str(default),
                (None, None) => {
                    warn!("Environment variable '{}' not found", name);
                    result.push_str(&rest[start..start + 2 + end + 1]);
                }
            }
            rest = &after[end + 1..];
        }
        result.push_str(rest);
        result
    }

    fn apply_env_overrides(&self, config: &mut WaysideConfig) -> ConfigResult<()> {
        let prefix = &self.env_prefix;

        if let Some(value) = self.var(&format!("{}_NODE_NAME", prefix)) {
            config.node.name = value;
        }
        if let Some(value) = self.var(&format!("{}_LOG_LEVEL", prefix)) {
            match LogLevel::parse(&value) {
                Some(level) => config.logging.level = level,
                None => {
                    return Err(ConfigError::invalid_env_var(
                        format!("{}_LOG_LEVEL", prefix),
                        "expected trace, debug, info, warn, or error",
                    ));
                }
            }
        }

        for (i, link) in config.links.iter_mut().enumerate() {
            let link_prefix = format!("{}_LINKS_{}", prefix, i);

            if let Some(value) = self.var(&format!("{}_ENABLED", link_prefix)) {
                link.enabled = parse_bool(&value);
            }
            if let Some(value) = self.var(&format!("{}_URI", link_prefix)) {
                link.uri = value;
            }
            if let Some(value) = self.var(&format!("{}_RETRIES", link_prefix)) {
                let retries = value.parse().map_err(|_| {
                    ConfigError::invalid_env_var(format!("{}_RETRIES", link_prefix), "expected a number")
                })?;
                link.retries = Some(retries);
            }
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigLoaderBuilder
// =============================================================================

/// Builder for [`ConfigLoader`].
#[derive(Debug, Default)]
pub struct ConfigLoaderBuilder {
    env_prefix: Option<String>,
    resolve_env_vars: Option<bool>,
    env: Option<HashMap<String, String>>,
}

impl ConfigLoaderBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the environment prefix.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn resolve_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = Some(enabled);
        self
    }

    /// Uses a fixed variable set.
    pub fn env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    /// Builds the loader.
    pub fn build(self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();
        if let Some(prefix) = self.env_prefix {
            loader.env_prefix = prefix;
        }
        if let Some(enabled) = self.resolve_env_vars {
            loader.resolve_env_vars = enabled;
        }
        loader.env = self.env;
        loader
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on" | "enabled")
}

fn parse_str(content: &str, format: ConfigFormat) -> ConfigResult<WaysideConfig> {
    match format {
        ConfigFormat::Yaml => parse_yaml(content),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| {
            let line = e.span().map(|span| line_of(content, span.start));
            parse_error(e.message(), line)
        }),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string(), Some(e.line()))),
    }
}

/// YAML goes through the `config` crate. Its errors carry no position, so
/// a failure is re-parsed with `serde_yaml` to recover the line.
fn parse_yaml<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let built = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .and_then(|c| c.try_deserialize::<T>());

    match built {
        Ok(value) => Ok(value),
        Err(err) => {
            let located = serde_yaml::from_str::<T>(content).err();
            let line = located.as_ref().and_then(|e| e.location()).map(|loc| loc.line());
            let message = located.map(|e| e.to_string()).unwrap_or_else(|| err.to_string());
            Err(parse_error(message, line))
        }
    }
}

fn parse_error(message: impl Into<String>, line: Option<usize>) -> ConfigError {
    ConfigError::Parse {
        path: "<string>".into(),
        message: message.into(),
        line,
    }
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset.min(content.len())].matches('\n').count() + 1
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<WaysideConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<WaysideConfig> {
    ConfigLoader::new().load_from_str(content, format)
}
