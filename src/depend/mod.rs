// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Depend model
//!
//! A depend file maps a source file path to further dependency paths,
//! adding directed edges to the file graph for closure computation. It
//! never spawns tasks and the file itself is optional.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::errors::{TickleError, TickleResult};
use crate::utils::paths;

/// Depend file contents: source path to dependency paths
pub type Depend = BTreeMap<String, Vec<String>>;

/// Compiled depend: absolute source path to absolute dependency paths
pub type CompiledDepend = BTreeMap<PathBuf, BTreeSet<PathBuf>>;

/// Wrapper used only to give the plain map a named schema on disk
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct DependFile(Depend);

/// Load a depend map from a YAML file. An empty document yields an
/// empty map; a missing file is the caller's concern.
pub fn load(path: &Path) -> TickleResult<Depend> {
    let content = std::fs::read_to_string(path).map_err(|e| TickleError::Io {
        message: format!("failed to read '{}': {}", path.display(), e),
    })?;
    from_yaml(path, &content)
}

/// Parse a depend map from a YAML string. An empty document (including
/// comment-only files) yields an empty map.
pub fn from_yaml(path: &Path, yaml: &str) -> TickleResult<Depend> {
    let file: Option<DependFile> =
        serde_yaml::from_str(yaml).map_err(|e| TickleError::schema(path, e))?;
    Ok(file.map(|file| file.0).unwrap_or_default())
}

/// Store a depend map as YAML.
pub fn store(path: &Path, depend: &Depend) -> TickleResult<()> {
    let yaml = serde_yaml::to_string(&DependFile(depend.clone()))
        .map_err(|e| TickleError::schema(path, e))?;
    std::fs::write(path, yaml).map_err(|e| TickleError::Io {
        message: format!("failed to write '{}': {}", path.display(), e),
    })?;
    Ok(())
}

/// Resolve all paths against the target directory.
pub fn compile(target_dir: &Path, depend: &Depend) -> CompiledDepend {
    depend
        .iter()
        .map(|(src, dsts)| {
            (
                paths::resolve(target_dir, src),
                dsts.iter()
                    .map(|dst| paths::resolve(target_dir, dst))
                    .collect(),
            )
        })
        .collect()
}
