// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `version` command.

use wayside_protocols::DriverRegistry;

use crate::cli::Cli;
use crate::error::BinResult;

/// Prints version and protocol information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("wayside - roadside device communication middleware");
    println!();
    println!("Version Information:");
    println!("  wayside-bin:  {}", crate::VERSION);
    println!("  wayside-core: {}", wayside_core::VERSION);
    println!();
    println!("Protocols:");
    for protocol in DriverRegistry::with_defaults().protocols() {
        println!("  {}", protocol);
    }
    println!();
    println!("Build Information:");
    println!("  Target: {}", std::env::consts::ARCH);
    println!("  OS:     {}", std::env::consts::OS);
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");
    Ok(())
}
