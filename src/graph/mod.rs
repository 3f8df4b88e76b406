// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Mutable task graph
//!
//! Tasks are addressed by stable integer IDs into a vector; `deps` and
//! `refs` are sorted ID sets kept inverse-consistent. The graph mutates
//! only while the evaluator is paused or not yet started; workers never
//! read graph state, only the work units captured into a program.

pub mod schedule;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::errors::{TaskError, TickleError, TickleResult};

/// Stable task identifier: an index into the graph's node vector
pub type TaskId = usize;

/// Task work closure: runs the task, optionally returning its stdout
pub type Work = dyn Fn() -> Result<Option<String>, TaskError> + Send + Sync;

/// A labelled work closure, cheap to clone into programs
#[derive(Clone)]
pub struct WorkUnit {
    description: String,
    work: Arc<Work>,
}

impl WorkUnit {
    pub fn new<F>(description: impl Into<String>, work: F) -> Self
    where
        F: Fn() -> Result<Option<String>, TaskError> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            work: Arc::new(work),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn perform(&self) -> Result<Option<String>, TaskError> {
        (self.work)()
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit")
            .field("description", &self.description)
            .finish()
    }
}

/// A single vertex of the task graph
#[derive(Debug)]
pub struct TaskNode {
    flows: BTreeMap<String, usize>,
    valid: bool,
    active: bool,
    force: bool,
    deps: BTreeSet<TaskId>,
    refs: BTreeSet<TaskId>,
    work: WorkUnit,
}

impl TaskNode {
    /// Stage index per flow this task participates in
    pub fn flows(&self) -> &BTreeMap<String, usize> {
        &self.flows
    }

    /// Whether the task's outputs are believed up to date.
    /// Force-flagged tasks always observe invalid.
    pub fn valid(&self) -> bool {
        if self.force {
            return false;
        }
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    /// Whether the task can run at all.
    /// Force-flagged tasks always observe active.
    pub fn active(&self) -> bool {
        if self.force {
            return true;
        }
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn force(&self) -> bool {
        self.force
    }

    /// Prerequisite task IDs
    pub fn deps(&self) -> &BTreeSet<TaskId> {
        &self.deps
    }

    /// Dependent task IDs
    pub fn refs(&self) -> &BTreeSet<TaskId> {
        &self.refs
    }

    pub fn work(&self) -> &WorkUnit {
        &self.work
    }
}

/// Index-based task graph
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: TaskId) -> &TaskNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: TaskId) -> &mut TaskNode {
        &mut self.nodes[id]
    }

    pub fn ids(&self) -> impl Iterator<Item = TaskId> {
        0..self.nodes.len()
    }

    /// Add a node, returning its ID.
    pub fn add_node(
        &mut self,
        flows: BTreeMap<String, usize>,
        work: WorkUnit,
        force: bool,
    ) -> TaskId {
        self.nodes.push(TaskNode {
            flows,
            valid: false,
            active: true,
            force,
            deps: BTreeSet::new(),
            refs: BTreeSet::new(),
            work,
        });
        self.nodes.len() - 1
    }

    /// Add a dependency edge consumer -> producer, rejecting edges that
    /// would make a task depend on a later stage of a shared flow.
    pub fn add_dependency(&mut self, consumer: TaskId, producer: TaskId) -> TickleResult<()> {
        for (flow, stage) in &self.nodes[consumer].flows {
            if let Some(producer_stage) = self.nodes[producer].flows.get(flow) {
                if stage < producer_stage {
                    return Err(TickleError::StageOrderViolation {
                        flow: flow.clone(),
                        consumer: self.nodes[consumer].work.description().to_string(),
                        producer: self.nodes[producer].work.description().to_string(),
                    });
                }
            }
        }
        self.nodes[consumer].deps.insert(producer);
        self.nodes[producer].refs.insert(consumer);
        Ok(())
    }

    /// Tasks nothing depends on; the final targets of the graph.
    pub fn roots(&self) -> Vec<TaskId> {
        self.ids()
            .filter(|&id| self.nodes[id].refs.is_empty())
            .collect()
    }

    /// Dependency-first topological order over all nodes.
    pub fn topological_order(&self) -> TickleResult<Vec<TaskId>> {
        let mut petgraph: DiGraph<TaskId, ()> = DiGraph::new();
        let indices: Vec<NodeIndex> = self.ids().map(|id| petgraph.add_node(id)).collect();
        for id in self.ids() {
            for &dep in &self.nodes[id].deps {
                petgraph.add_edge(indices[dep], indices[id], ());
            }
        }
        match toposort(&petgraph, None) {
            Ok(order) => Ok(order.into_iter().map(|index| petgraph[index]).collect()),
            Err(cycle) => Err(TickleError::AgendaCycle {
                tasks: self.cycle_members(petgraph[cycle.node_id()]),
            }),
        }
    }

    /// Cheap acyclicity check.
    pub fn check_acyclic(&self) -> TickleResult<()> {
        self.topological_order().map(|_| ())
    }

    /// Find a dependency path from `start` back to itself.
    fn cycle_members(&self, start: TaskId) -> Vec<String> {
        fn visit(
            graph: &TaskGraph,
            node: TaskId,
            target: TaskId,
            path: &mut Vec<TaskId>,
            visited: &mut BTreeSet<TaskId>,
        ) -> bool {
            for &dep in &graph.nodes[node].deps {
                if dep == target {
                    return true;
                }
                if !visited.insert(dep) {
                    continue;
                }
                path.push(dep);
                if visit(graph, dep, target, path, visited) {
                    return true;
                }
                path.pop();
            }
            false
        }

        let mut path = vec![start];
        let mut visited = BTreeSet::from([start]);
        visit(self, start, start, &mut path, &mut visited);
        path.iter()
            .map(|&id| self.nodes[id].work.description().to_string())
            .collect()
    }

    /// Propagate invalidity and inactivity from prerequisites to
    /// dependents in topological order.
    pub fn propagate(&mut self) -> TickleResult<()> {
        for id in self.topological_order()? {
            let mut invalid = false;
            let mut inactive = false;
            for &dep in &self.nodes[id].deps {
                if !self.nodes[dep].valid() {
                    invalid = true;
                }
                if !self.nodes[dep].active() {
                    inactive = true;
                }
            }
            if invalid {
                self.nodes[id].valid = false;
            }
            if inactive {
                self.nodes[id].active = false;
            }
        }
        Ok(())
    }
}
