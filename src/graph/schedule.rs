// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Schedule compiler
//!
//! Turns the mutated task graph into an ordered list of batches, each a
//! set of sequences safe to run in parallel; each sequence is a chain of
//! tasks one worker runs back-to-back. The compiler must honor both the
//! data-dependency order and the stage order of every flow, without
//! serializing beyond those constraints.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use super::{TaskGraph, TaskId};
use crate::errors::{TickleError, TickleResult};

/// Batches of sequences of task IDs, in execution order
pub type Schedule = Vec<Vec<Vec<TaskId>>>;

/// Compile the graph's current validity/activity state into a schedule.
pub fn compile(graph: &TaskGraph) -> TickleResult<Schedule> {
    graph.check_acyclic()?;

    let alive = alive_set(graph);
    if alive.is_empty() {
        return Ok(Vec::new());
    }

    let (sequences, seq_of) = join_sequences(graph, &alive);
    let seq_deps = sequence_deps(graph, &alive, &sequences, &seq_of);
    let flow_lists = per_flow_batches(graph, &sequences, &seq_deps);
    let levels = combined_levels(graph, &sequences, &seq_deps, &flow_lists)?;

    let batch_count = levels.iter().max().map_or(0, |max| max + 1);
    let mut batches: Schedule = vec![Vec::new(); batch_count];
    for (index, sequence) in sequences.into_iter().enumerate() {
        batches[levels[index]].push(sequence);
    }
    Ok(batches)
}

/// Tasks that must run: ancestors of the graph roots that are invalid
/// and active. Traversal stops at valid nodes (their ancestors are valid
/// by propagation) but descends through inactive ones.
fn alive_set(graph: &TaskGraph) -> BTreeSet<TaskId> {
    let mut alive = BTreeSet::new();
    let mut visited = BTreeSet::new();
    let mut worklist: VecDeque<TaskId> = graph.roots().into();
    while let Some(id) = worklist.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        let node = graph.node(id);
        if node.valid() {
            continue;
        }
        if node.active() {
            alive.insert(id);
        }
        worklist.extend(node.deps().iter().copied());
    }
    alive
}

/// Join chains of alive tasks into sequences.
///
/// A task extends its sole alive dependency's sequence only when it is
/// that dependency's sole alive dependent (force-flagged sentinels do
/// not count against this) and the two agree on the stage of every
/// shared flow. Anything else starts a new sequence.
fn join_sequences(
    graph: &TaskGraph,
    alive: &BTreeSet<TaskId>,
) -> (Vec<Vec<TaskId>>, HashMap<TaskId, usize>) {
    let mut sequences: Vec<Vec<TaskId>> = Vec::new();
    let mut seq_of: HashMap<TaskId, usize> = HashMap::new();
    let mut visited: BTreeSet<TaskId> = BTreeSet::new();

    let mut worklist: VecDeque<TaskId> = alive
        .iter()
        .copied()
        .filter(|&id| graph.node(id).deps().iter().all(|dep| !alive.contains(dep)))
        .collect();

    while let Some(id) = worklist.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        let alive_deps: Vec<TaskId> = graph
            .node(id)
            .deps()
            .iter()
            .copied()
            .filter(|dep| alive.contains(dep))
            .collect();

        let joined = match alive_deps[..] {
            [dep] if joinable(graph, alive, id, dep) => seq_of.get(&dep).copied(),
            _ => None,
        };
        match joined {
            Some(index) => {
                sequences[index].push(id);
                seq_of.insert(id, index);
            }
            None => {
                seq_of.insert(id, sequences.len());
                sequences.push(vec![id]);
            }
        }

        for &dependent in graph.node(id).refs() {
            if alive.contains(&dependent) {
                worklist.push_back(dependent);
            }
        }
    }

    (sequences, seq_of)
}

fn joinable(graph: &TaskGraph, alive: &BTreeSet<TaskId>, id: TaskId, dep: TaskId) -> bool {
    let sole_dependent = graph
        .node(dep)
        .refs()
        .iter()
        .copied()
        .filter(|r| alive.contains(r))
        .filter(|&r| r == id || !graph.node(r).force())
        .all(|r| r == id);
    if !sole_dependent {
        return false;
    }
    graph.node(id).flows().iter().all(|(flow, stage)| {
        graph
            .node(dep)
            .flows()
            .get(flow)
            .map_or(true, |dep_stage| stage == dep_stage)
    })
}

/// Inter-sequence dependency sets, derived from alive task edges.
fn sequence_deps(
    graph: &TaskGraph,
    alive: &BTreeSet<TaskId>,
    sequences: &[Vec<TaskId>],
    seq_of: &HashMap<TaskId, usize>,
) -> Vec<BTreeSet<usize>> {
    let mut deps = vec![BTreeSet::new(); sequences.len()];
    for (index, sequence) in sequences.iter().enumerate() {
        for &task in sequence {
            for dep in graph.node(task).deps() {
                if !alive.contains(dep) {
                    continue;
                }
                let dep_index = seq_of[dep];
                if dep_index != index {
                    deps[index].insert(dep_index);
                }
            }
        }
    }
    deps
}

/// The stage a sequence occupies in a flow: the stage of its first task
/// that participates in that flow.
fn sequence_stage(graph: &TaskGraph, sequence: &[TaskId], flow: &str) -> Option<usize> {
    sequence
        .iter()
        .find_map(|&task| graph.node(task).flows().get(flow).copied())
}

/// For each flow, the ordered list of batches its stage constraints
/// impose: stages in increasing order, each stage partitioned by
/// longest-path depth over same-stage sequence dependencies.
fn per_flow_batches(
    graph: &TaskGraph,
    sequences: &[Vec<TaskId>],
    seq_deps: &[BTreeSet<usize>],
) -> Vec<Vec<Vec<usize>>> {
    let mut flow_names: BTreeSet<&str> = BTreeSet::new();
    for sequence in sequences {
        for &task in sequence {
            flow_names.extend(graph.node(task).flows().keys().map(String::as_str));
        }
    }

    let mut lists = Vec::new();
    for flow in flow_names {
        let mut by_stage: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (index, sequence) in sequences.iter().enumerate() {
            if let Some(stage) = sequence_stage(graph, sequence, flow) {
                by_stage.entry(stage).or_default().push(index);
            }
        }
        let mut list: Vec<Vec<usize>> = Vec::new();
        for members in by_stage.values() {
            list.extend(stage_batches(members, seq_deps));
        }
        lists.push(list);
    }
    lists
}

/// Longest-path batching of one stage's sequences over the sequence
/// dependencies restricted to that stage.
fn stage_batches(members: &[usize], seq_deps: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    let member_set: BTreeSet<usize> = members.iter().copied().collect();
    let restricted: BTreeMap<usize, BTreeSet<usize>> = members
        .iter()
        .map(|&seq| {
            (
                seq,
                seq_deps[seq].intersection(&member_set).copied().collect(),
            )
        })
        .collect();

    let mut refs: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut indegree: BTreeMap<usize, usize> = BTreeMap::new();
    for (&seq, deps) in &restricted {
        indegree.insert(seq, deps.len());
        for &dep in deps {
            refs.entry(dep).or_default().push(seq);
        }
    }

    let mut levels: BTreeMap<usize, usize> = BTreeMap::new();
    let mut worklist: VecDeque<usize> = members
        .iter()
        .copied()
        .filter(|seq| indegree[seq] == 0)
        .collect();
    while let Some(seq) = worklist.pop_front() {
        let level = restricted[&seq]
            .iter()
            .filter_map(|dep| levels.get(dep))
            .map(|dep_level| dep_level + 1)
            .max()
            .unwrap_or(0);
        levels.insert(seq, level);
        for &dependent in refs.get(&seq).into_iter().flatten() {
            let remaining = indegree.get_mut(&dependent).expect("member indegree");
            *remaining -= 1;
            if *remaining == 0 {
                worklist.push_back(dependent);
            }
        }
    }

    let depth = levels.values().max().map_or(0, |max| max + 1);
    let mut batches = vec![Vec::new(); depth];
    for (seq, level) in levels {
        batches[level].push(seq);
    }
    batches
}

/// Union the per-flow must-precede edges with the sequence dependency
/// graph and recompute batch indices by longest path from the leaves.
fn combined_levels(
    graph: &TaskGraph,
    sequences: &[Vec<TaskId>],
    seq_deps: &[BTreeSet<usize>],
    flow_lists: &[Vec<Vec<usize>>],
) -> TickleResult<Vec<usize>> {
    let count = sequences.len();
    let mut deps: Vec<BTreeSet<usize>> = seq_deps.to_vec();
    for list in flow_lists {
        for window in list.windows(2) {
            for &later in &window[1] {
                for &earlier in &window[0] {
                    if later != earlier {
                        deps[later].insert(earlier);
                    }
                }
            }
        }
    }

    let mut refs: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut indegree: Vec<usize> = vec![0; count];
    for (seq, seq_deps) in deps.iter().enumerate() {
        indegree[seq] = seq_deps.len();
        for &dep in seq_deps {
            refs[dep].push(seq);
        }
    }

    let mut levels: Vec<Option<usize>> = vec![None; count];
    let mut worklist: VecDeque<usize> =
        (0..count).filter(|&seq| indegree[seq] == 0).collect();
    while let Some(seq) = worklist.pop_front() {
        let level = deps[seq]
            .iter()
            .filter_map(|&dep| levels[dep])
            .map(|dep_level| dep_level + 1)
            .max()
            .unwrap_or(0);
        levels[seq] = Some(level);
        for &dependent in &refs[seq] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                worklist.push_back(dependent);
            }
        }
    }

    if levels.iter().any(Option::is_none) {
        let tasks = sequences
            .iter()
            .enumerate()
            .filter(|(seq, _)| levels[*seq].is_none())
            .map(|(_, sequence)| {
                graph.node(sequence[0]).work().description().to_string()
            })
            .collect();
        return Err(TickleError::AgendaCycle { tasks });
    }
    Ok(levels.into_iter().flatten().collect())
}
