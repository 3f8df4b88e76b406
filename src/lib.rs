// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! # tickle - Task Graph Scheduling
//!
//! `tickle` evaluates a user-declared graph of build-like tasks
//! concurrently, honoring explicit file dependencies, multi-stage
//! workflows and optional dynamic dependencies discovered between runs.
//!
//! ## Features
//!
//! - **Declarative agendas** - procs, flows and tasks in plain YAML
//! - **Incremental** - content-hash invalidation re-runs only what changed
//! - **Concurrent** - a worker pool runs independent task sequences in parallel
//! - **Staged workflows** - flows pin procs to ordered stages
//! - **Online mode** - file modifications reschedule the graph while running
//!
//! ## Quick Start
//!
//! ```bash
//! # One-shot evaluation of whatever is stale
//! tickle offline
//!
//! # Keep evaluating as inputs change
//! tickle online
//!
//! # Remove everything generated during evaluation
//! tickle clean
//! ```

pub mod agenda;
pub mod cache;
pub mod cli;
pub mod depend;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod utils;
pub mod watch;

// Re-export commonly used types
pub use engine::{clean, Evaluator, OfflineDriver, OnlineDriver};
pub use errors::{TaskError, TickleError, TickleResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
