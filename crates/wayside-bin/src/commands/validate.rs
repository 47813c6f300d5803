// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `validate` command.

use std::path::Path;

use serde_json::json;

use wayside_config::{WaysideConfig, load_config};
use wayside_core::Protocol;
use wayside_protocols::{cbw, e6, sierragx};

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Device kind each protocol polls, if any.
fn polled_kind(protocol: Protocol) -> Option<&'static str> {
    match protocol {
        Protocol::E6 => Some(e6::READER_KIND),
        Protocol::Cbw => Some(cbw::BEACON_KIND),
        Protocol::SierraGx => Some(sierragx::GPS_KIND),
        Protocol::PelcoD => None,
    }
}

/// Outcome of checking a loaded configuration.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Problems that do not stop the node.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Collects warnings for a configuration that passed validation.
    pub fn check(config: &WaysideConfig) -> Self {
        let mut warnings = Vec::new();
        if config.links.is_empty() {
            warnings.push("No links configured".to_string());
        }
        for link in &config.links {
            if !link.enabled {
                warnings.push(format!("Link '{}' is disabled", link.id));
            }
            if link.controllers.is_empty() {
                warnings.push(format!("Link '{}' has no controllers", link.id));
            }
            if !link.poll.enabled {
                continue;
            }
            let polled = polled_kind(link.protocol);
            let any_polled = link
                .controllers
                .iter()
                .flat_map(|c| c.devices.iter())
                .any(|d| Some(d.kind.as_str()) == polled && (link.protocol != Protocol::Cbw || d.pin.is_some()));
            if !link.controllers.is_empty() && !any_polled {
                warnings.push(format!("Link '{}' polls but no device of it is polled by {}", link.id, link.protocol));
            }
        }
        Self { warnings }
    }
}

/// Loads and checks the configuration file.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let path = &cli.config;
    let config = load_config(path).map_err(|e| BinError::from(e).with_context("Configuration is invalid"))?;
    let report = ValidationReport::check(&config);

    match args.format {
        OutputFormat::Text => print_text(path, &config, &report),
        OutputFormat::Json => {
            let output = json!({
                "valid": true,
                "config_path": path.display().to_string(),
                "summary": {
                    "node": config.node.name,
                    "links": config.links.len(),
                    "controllers": config.controller_count(),
                    "modems": config.modem_pool.modems.len(),
                },
                "warnings": report.warnings,
            });
            let text = serde_json::to_string_pretty(&output).map_err(|e| BinError::runtime(e.to_string()))?;
            println!("{}", text);
        }
    }

    if args.strict && !report.warnings.is_empty() {
        return Err(BinError::config(format!("Strict mode: {} warning(s) found", report.warnings.len())));
    }
    Ok(())
}

fn print_text(path: &Path, config: &WaysideConfig, report: &ValidationReport) {
    println!("Configuration is valid: {}", path.display());
    println!();
    println!("Summary:");
    println!("  Node:        {}", config.node.name);
    println!("  Links:       {}", config.links.len());
    for link in &config.links {
        println!(
            "    {} ({}) {} controllers: {}",
            link.id,
            link.protocol,
            link.uri,
            link.controllers.len()
        );
    }
    println!("  Controllers: {}", config.controller_count());
    println!("  Modems:      {}", config.modem_pool.modems.len());

    if !report.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use wayside_config::{ControllerConfig, DeviceConfig, LinkConfig};

    fn controller(kind: &str, pin: Option<u16>) -> ControllerConfig {
        ControllerConfig {
            id: "c1".into(),
            drop: 1,
            enabled: true,
            devices: vec![DeviceConfig {
                id: "d1".into(),
                kind: kind.into(),
                pin,
                verify_pin: None,
                params: Default::default(),
            }],
        }
    }

    #[test]
    fn test_warnings() {
        assert_eq!(ValidationReport::check(&WaysideConfig::default()).warnings.len(), 1);

        let mut link = LinkConfig::new("l1", Protocol::Cbw, "tcp://h:80");
        link.controllers.push(controller("beacon", None));
        let config = WaysideConfig {
            links: vec![link],
            ..Default::default()
        };
        let report = ValidationReport::check(&config);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("no device"));
    }

    #[test]
    fn test_polled_devices_are_quiet() {
        let mut link = LinkConfig::new("l1", Protocol::E6, "tcp://h:80");
        link.controllers.push(controller("tag_reader", None));
        let config = WaysideConfig {
            links: vec![link],
            ..Default::default()
        };
        assert!(ValidationReport::check(&config).warnings.is_empty());
    }

    #[test]
    fn test_strict_mode_fails_on_warnings() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(b"node:\n  name: empty\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::parse_from(["wayside", "-c", path.as_str(), "validate"]);
        assert!(validate(&cli, ValidateArgs::default()).is_ok());

        let strict = ValidateArgs {
            strict: true,
            ..Default::default()
        };
        assert!(matches!(validate(&cli, strict), Err(BinError::Configuration(_))));
    }
}
