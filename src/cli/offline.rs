// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Offline mode handler

use colored::Colorize;
use tracing::error;

use super::{resolve_flag, Cli};
use crate::engine::OfflineDriver;
use crate::errors::{TickleError, TickleResult};

/// Run the offline mode: one-shot evaluation of whatever is stale.
pub fn run(args: &Cli) -> TickleResult<()> {
    let target_dir = std::env::current_dir()?;
    let agenda_path = resolve_flag(&target_dir, &args.agenda);
    let depend_path = resolve_flag(&target_dir, &args.depend);
    let cache_path = resolve_flag(&target_dir, &args.cache);

    if !agenda_path.is_file() {
        error!("Agenda file not found: {}", agenda_path.display());
        return Err(TickleError::AgendaNotFound { path: agenda_path });
    }

    let driver = OfflineDriver::new(
        target_dir,
        agenda_path,
        depend_path,
        cache_path,
        args.workers,
    )?;
    match driver.run() {
        Ok(()) => Ok(()),
        Err(TickleError::TaskFailed { description, stderr }) => {
            error!("Task \"{description}\" failed with message:\n{stderr}");
            eprintln!("{} task \"{}\" failed", "error:".red().bold(), description);
            Err(TickleError::TaskFailed { description, stderr })
        }
        Err(error) => Err(error),
    }
}
