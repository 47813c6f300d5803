// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `run` command.

use crate::cli::{Cli, RunArgs};
use crate::error::{BinError, BinResult};
use crate::logging::init_logging;
use crate::runtime::RuntimeBuilder;

/// Loads the configuration, sets up logging from it, and runs the node.
pub async fn run(cli: &Cli, args: RunArgs) -> BinResult<()> {
    let config = wayside_config::load_config(&cli.config)
        .map_err(|e| BinError::from(e).with_context(format!("loading {}", cli.config.display())))?;

    init_logging(
        &cli.effective_log_level(Some(&config.logging)),
        cli.effective_log_format(Some(&config.logging)),
    );

    RuntimeBuilder::new()
        .config(config)
        .poll(!args.no_poll)
        .build()?
        .run()
        .await
}
