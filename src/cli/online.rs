// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Online mode handler

use colored::Colorize;
use tracing::{error, info};

use super::{resolve_flag, Cli};
use crate::engine::OnlineDriver;
use crate::errors::{TickleError, TickleResult};

/// Run the online mode: persistent evaluation until interrupted.
pub fn run(args: &Cli) -> TickleResult<()> {
    let target_dir = std::env::current_dir()?;
    let agenda_path = resolve_flag(&target_dir, &args.agenda);
    let depend_path = resolve_flag(&target_dir, &args.depend);
    let cache_path = resolve_flag(&target_dir, &args.cache);

    if !agenda_path.is_file() {
        error!("Agenda file not found: {}", agenda_path.display());
        return Err(TickleError::AgendaNotFound { path: agenda_path });
    }

    let driver = OnlineDriver::new(
        target_dir,
        agenda_path,
        depend_path,
        cache_path,
        args.workers,
    )?;

    // SIGINT/SIGTERM wind the evaluator down; the current batch's
    // in-flight tasks complete first.
    let handle = driver.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl-C registered; terminating ...");
        handle.stop();
    })
    .map_err(|e| TickleError::Io {
        message: format!("failed to install signal handler: {e}"),
    })?;

    println!(
        "Watching for changes; press {} to exit.",
        "Ctrl+C".cyan()
    );
    driver.run()
}
