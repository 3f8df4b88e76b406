// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! tickle - Task Graph Scheduling
//!
//! Evaluate a declarative task graph concurrently, offline or online.

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use tickle::cli::{Cli, Mode};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Version mode needs no logging setup
    if cli.mode == Mode::Version {
        println!("{}", tickle::VERSION);
        return Ok(());
    }

    // Runtime messages go to the log file (debug level behind --debug)
    // and, at info level, to the terminal.
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cli.log)
        .into_diagnostic()?;
    let file_level = if cli.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(log_file))
                .with_ansi(false)
                .with_target(false)
                .with_filter(file_level),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .without_time()
                .with_filter(LevelFilter::INFO),
        )
        .init();

    // Dispatch to mode handlers
    let result = match cli.mode {
        Mode::Offline => tickle::cli::offline::run(&cli),
        Mode::Online => tickle::cli::online::run(&cli),
        Mode::Clean => tickle::cli::clean::run(&cli),
        Mode::Version => Ok(()),
    };
    result.map_err(Into::into)
}
