// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! CLI definition and mode handlers

pub mod clean;
pub mod offline;
pub mod online;

use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

use crate::utils::paths;

/// Task graph scheduling with concurrent evaluation
#[derive(Parser, Debug)]
#[command(
    name = "tickle",
    version,
    about = "Task graph scheduling with concurrent evaluation",
    long_about = None,
    after_help = "Examples:\n\
        tickle offline                  Evaluate whatever is stale, then exit\n\
        tickle online                   Keep evaluating as inputs change\n\
        tickle clean                    Remove generated files and the cache\n\
        tickle offline --workers 4      Limit the worker pool"
)]
pub struct Cli {
    /// Evaluation mode: offline ignores file modifications once tasks
    /// have been scheduled, online reschedules on file events, clean
    /// deletes everything generated, version prints the tool version
    #[arg(value_enum)]
    pub mode: Mode,

    /// Number of concurrent workers; defaults to the number of logical
    /// cores minus one for the main thread
    #[arg(short, long, default_value_t = default_worker_count())]
    pub workers: usize,

    /// Agenda YAML file location; contains the procedure and task
    /// definitions, relative to the current working directory
    #[arg(short, long, default_value = "./agenda.yaml")]
    pub agenda: PathBuf,

    /// Depend YAML file location; contains a map of dynamic task
    /// dependencies, this file is optional
    #[arg(short, long, default_value = "./depend.yaml")]
    pub depend: PathBuf,

    /// Binary cache file location; contains inter-run persistent data
    #[arg(short, long, default_value = "./tickle.cache")]
    pub cache: PathBuf,

    /// Log file location; contains runtime messages
    #[arg(short, long, default_value = "./tickle.log")]
    pub log: PathBuf,

    /// Sets debug logging level for tool messages
    #[arg(long)]
    pub debug: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Offline,
    Online,
    Clean,
    Version,
}

/// Default worker pool size: logical cores minus one for the driver.
pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Resolve a CLI path flag against the target directory.
pub(crate) fn resolve_flag(target_dir: &Path, flag: &Path) -> PathBuf {
    paths::resolve(target_dir, &flag.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_mode_and_defaults_parse() {
        let cli = Cli::parse_from(["tickle", "offline"]);
        assert_eq!(cli.mode, Mode::Offline);
        assert_eq!(cli.agenda, PathBuf::from("./agenda.yaml"));
        assert_eq!(cli.depend, PathBuf::from("./depend.yaml"));
        assert_eq!(cli.cache, PathBuf::from("./tickle.cache"));
        assert_eq!(cli.log, PathBuf::from("./tickle.log"));
        assert!(!cli.debug);
        assert!(cli.workers >= 1);
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "tickle", "online", "-w", "3", "-a", "other.yaml", "--debug",
        ]);
        assert_eq!(cli.mode, Mode::Online);
        assert_eq!(cli.workers, 3);
        assert_eq!(cli.agenda, PathBuf::from("other.yaml"));
        assert!(cli.debug);
    }

    #[test]
    fn test_default_worker_count_is_positive() {
        assert!(default_worker_count() >= 1);
    }
}
