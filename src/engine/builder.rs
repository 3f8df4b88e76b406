// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Task graph construction
//!
//! Builds the mutable task graph from a compiled agenda: one node per
//! task with a subprocess work closure, and a dependency edge from each
//! consumer to the producer of every input it names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};

use crate::agenda::{CompiledAgenda, CompiledTask};
use crate::cache::{hash, Cache, SharedCache};
use crate::errors::{TaskError, TickleError, TickleResult};
use crate::graph::{TaskGraph, WorkUnit};
use crate::utils::paths::path_key;

/// Synthetic per-run task name; index into the compiled agenda.
pub fn task_name(index: usize) -> String {
    format!("task{index}")
}

/// Build the task graph for a compiled agenda.
pub fn build_graph(
    target_dir: &Path,
    agenda: &CompiledAgenda,
    cache: &SharedCache,
) -> TickleResult<TaskGraph> {
    let mut graph = TaskGraph::new();
    let mut output_map: HashMap<PathBuf, usize> = HashMap::new();

    for (index, task_data) in agenda.iter().enumerate() {
        let work = make_work(target_dir, index, task_data, cache);
        let id = graph.add_node(task_data.flows.clone(), work, false);
        debug_assert_eq!(id, index);
        for output in &task_data.outputs {
            if let Some(&producer) = output_map.get(output) {
                return Err(TickleError::MultipleOutputProducers {
                    path: output.clone(),
                    first: agenda[producer].description.clone(),
                    second: task_data.description.clone(),
                });
            }
            output_map.insert(output.clone(), index);
        }
    }

    for (consumer, task_data) in agenda.iter().enumerate() {
        for input in &task_data.inputs {
            if let Some(&producer) = output_map.get(input) {
                graph.add_dependency(consumer, producer)?;
            }
        }
    }

    Ok(graph)
}

fn make_work(
    target_dir: &Path,
    index: usize,
    task_data: &CompiledTask,
    cache: &SharedCache,
) -> WorkUnit {
    let target_dir = target_dir.to_path_buf();
    let name = task_name(index);
    let task_data = task_data.clone();
    let cache = Arc::clone(cache);
    WorkUnit::new(task_data.description.clone(), move || {
        run_task(&target_dir, &name, &task_data, &cache)
    })
}

/// Execute one task: prepare output folders, spawn the command, then
/// refresh the tracked input digests.
fn run_task(
    target_dir: &Path,
    task_name: &str,
    task_data: &CompiledTask,
    cache: &SharedCache,
) -> Result<Option<String>, TaskError> {
    debug!("{}: {}", task_data.description, task_data.command.join(" "));
    info!("{}", task_data.description);

    let fail = |message: String| TaskError::new(&task_data.description, message);

    {
        let mut cache = cache.lock();
        for output in &task_data.outputs {
            make_dirs(output, &mut cache);
        }
        for output in &task_data.outputs {
            cache.data.files.insert(path_key(output));
        }
        cache
            .flush()
            .map_err(|e| fail(format!("cache flush failed: {e}")))?;
    }

    let (program, arguments) = match task_data.command.split_first() {
        Some(parts) => parts,
        None => return Err(fail("empty command".into())),
    };
    let output = Command::new(program)
        .args(arguments)
        .current_dir(target_dir)
        .output()
        .map_err(|e| fail(format!("failed to spawn '{program}': {e}")))?;

    if !output.status.success() {
        let _ = cache.lock().flush();
        return Err(TaskError::new(
            &task_data.description,
            String::from_utf8_lossy(&output.stderr),
        ));
    }

    // Refresh digests of every input tracked for this task; an output a
    // sibling produced may still be landing on disk.
    let tracked: Vec<String> = {
        let cache = cache.lock();
        cache
            .data
            .hashes
            .get(task_name)
            .map(|digests| digests.keys().cloned().collect())
            .unwrap_or_default()
    };
    for file in &tracked {
        let digest = hash::digest_file_wait(Path::new(file))
            .map_err(|e| fail(format!("failed to hash '{file}': {e}")))?;
        let mut cache = cache.lock();
        if let Some(digests) = cache.data.hashes.get_mut(task_name) {
            digests.insert(file.clone(), Some(digest));
        }
    }
    cache
        .lock()
        .flush()
        .map_err(|e| fail(format!("cache flush failed: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    Ok(if stdout.is_empty() { None } else { Some(stdout) })
}

/// Create the missing ancestors of an output path root-first, recording
/// each directory this engine actually created.
fn make_dirs(output: &Path, cache: &mut Cache) {
    let Some(parent) = output.parent() else {
        return;
    };
    let mut ancestors: Vec<&Path> = parent
        .ancestors()
        .filter(|dir| !dir.as_os_str().is_empty())
        .collect();
    ancestors.reverse();
    for dir in ancestors {
        if dir.exists() {
            continue;
        }
        if std::fs::create_dir(dir).is_ok() {
            cache.data.folders.insert(path_key(dir));
        }
    }
}
