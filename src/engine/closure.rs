// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Depend-closure computation
//!
//! Joins the task-declared file edges (output -> inputs) with the depend
//! map into one file graph, rejects cycles, and computes for every
//! reachable file the transitive set of files it depends on. Files that
//! are reachable but not named by any task directly are the implicit
//! sources the online driver additionally watches.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::agenda::CompiledAgenda;
use crate::depend::CompiledDepend;
use crate::errors::{TickleError, TickleResult};
use crate::utils::paths::path_key;

/// Transitive dependency set per file
pub type FileClosures = HashMap<String, BTreeSet<String>>;

/// Compute (implicit files, per-file closures) for the current agenda
/// and depend map.
pub fn depend_closure(
    agenda: &CompiledAgenda,
    depend: &CompiledDepend,
) -> TickleResult<(BTreeSet<String>, FileClosures)> {
    // File graph: every task output depends on the task's inputs, plus
    // the depend edges.
    let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for task_data in agenda {
        let inputs: BTreeSet<String> = task_data.inputs.iter().map(|p| path_key(p)).collect();
        for output in &task_data.outputs {
            deps.entry(path_key(output))
                .or_default()
                .extend(inputs.iter().cloned());
        }
    }
    for (src, dsts) in depend {
        deps.entry(path_key(src))
            .or_default()
            .extend(dsts.iter().map(|p| path_key(p)));
    }

    let ordered = reverse_topological(&deps)?;

    // Reachable files from the graph's sources
    let mut alive: BTreeSet<String> = BTreeSet::new();
    let mut worklist: Vec<&String> = deps.keys().collect();
    while let Some(node) = worklist.pop() {
        if !alive.insert(node.clone()) {
            continue;
        }
        if let Some(node_deps) = deps.get(node) {
            worklist.extend(node_deps.iter());
        }
    }

    // Closures in dependency-first order
    let mut closures = FileClosures::new();
    for file in ordered {
        if !alive.contains(&file) {
            continue;
        }
        let closure = match deps.get(&file) {
            None => BTreeSet::new(),
            Some(file_deps) => {
                let mut closure = file_deps.clone();
                for dep in file_deps {
                    if let Some(transitive) = closures.get(dep) {
                        closure.extend(transitive.iter().cloned());
                    }
                }
                closure
            }
        };
        closures.insert(file, closure);
    }

    // Implicit files: reachable but not named by any task directly
    let mut explicit: BTreeSet<String> = BTreeSet::new();
    for task_data in agenda {
        explicit.extend(task_data.inputs.iter().map(|p| path_key(p)));
        explicit.extend(task_data.outputs.iter().map(|p| path_key(p)));
    }
    let implicits = alive.difference(&explicit).cloned().collect();

    Ok((implicits, closures))
}

/// All files of the graph in dependency-first order, or the offending
/// cycle.
fn reverse_topological(deps: &BTreeMap<String, BTreeSet<String>>) -> TickleResult<Vec<String>> {
    let mut petgraph: DiGraph<String, ()> = DiGraph::new();
    let mut indices: HashMap<&String, NodeIndex> = HashMap::new();

    for (src, dsts) in deps {
        for file in std::iter::once(src).chain(dsts.iter()) {
            indices
                .entry(file)
                .or_insert_with(|| petgraph.add_node(file.clone()));
        }
    }
    for (src, dsts) in deps {
        for dst in dsts {
            petgraph.add_edge(indices[src], indices[dst], ());
        }
    }

    match toposort(&petgraph, None) {
        // Edges point src -> dst (dependency); reversing the sort yields
        // dependencies before their dependents.
        Ok(order) => Ok(order
            .into_iter()
            .rev()
            .map(|index| petgraph[index].clone())
            .collect()),
        Err(cycle) => Err(TickleError::DependCycle {
            files: cycle_members(deps, &petgraph[cycle.node_id()]),
        }),
    }
}

/// Find a dependency path from `start` back to itself in the file graph.
fn cycle_members(deps: &BTreeMap<String, BTreeSet<String>>, start: &String) -> Vec<String> {
    fn visit(
        deps: &BTreeMap<String, BTreeSet<String>>,
        node: &String,
        target: &String,
        path: &mut Vec<String>,
        visited: &mut BTreeSet<String>,
    ) -> bool {
        let Some(node_deps) = deps.get(node) else {
            return false;
        };
        for dep in node_deps {
            if dep == target {
                return true;
            }
            if !visited.insert(dep.clone()) {
                continue;
            }
            path.push(dep.clone());
            if visit(deps, dep, target, path, visited) {
                return true;
            }
            path.pop();
        }
        false
    }

    let mut path = vec![start.clone()];
    let mut visited = BTreeSet::from([start.clone()]);
    visit(deps, start, start, &mut path, &mut visited);
    path
}
