// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Clean mode handler

use super::{resolve_flag, Cli};
use crate::engine;
use crate::errors::TickleResult;

/// Run the clean mode: delete generated files, folders and the cache.
pub fn run(args: &Cli) -> TickleResult<()> {
    let target_dir = std::env::current_dir()?;
    let cache_path = resolve_flag(&target_dir, &args.cache);
    engine::clean(&target_dir, &cache_path)
}
