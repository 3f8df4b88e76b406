// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Schedule preparation
//!
//! Runs in a critical section while the evaluator is paused (or not yet
//! started): recovers task identity across agenda edits, deactivates
//! impossible tasks, invalidates tasks whose input closures or outputs
//! changed, propagates, and compiles the executable program.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

use super::builder::task_name;
use super::closure::FileClosures;
use super::evaluator::Program;
use crate::agenda::CompiledAgenda;
use crate::cache::{hash, SharedCache};
use crate::errors::TickleResult;
use crate::graph::{schedule, TaskGraph};
use crate::utils::paths::{display_relative, path_key};

/// Recompute task validity/activity against the cache and compile the
/// graph into an executable program.
pub fn make_schedule(
    target_dir: &Path,
    graph: &mut TaskGraph,
    agenda: &CompiledAgenda,
    closures: &FileClosures,
    cache: &SharedCache,
) -> TickleResult<Program> {
    let task_count = agenda.len();
    {
        let mut cache = cache.lock();

        // Clear graph progress and prepare cache entries
        for id in graph.ids() {
            graph.node_mut(id).set_valid(true);
            graph.node_mut(id).set_active(true);
        }
        for index in 0..task_count {
            cache.data.hashes.entry(task_name(index)).or_default();
        }

        // Task recovery: carry digest maps across task renumbering for
        // tasks whose fingerprint is unchanged.
        let previous = std::mem::take(&mut cache.data.recover);
        let mut recovered = BTreeMap::new();
        for (index, task_data) in agenda.iter().enumerate() {
            let name = task_name(index);
            cache
                .data
                .recover
                .insert(task_data.hash.clone(), name.clone());
            let source = previous.get(&task_data.hash).unwrap_or(&name);
            let digests = cache.data.hashes.get(source).cloned().unwrap_or_default();
            recovered.insert(name, digests);
        }
        cache.data.hashes = recovered;

        // Disable impossible tasks: an input that neither exists nor is
        // produced by a possible task upstream.
        let order = graph.topological_order()?;
        let mut produced: BTreeSet<String> = BTreeSet::new();
        for id in order.into_iter().filter(|&id| id < task_count) {
            let task_data = &agenda[id];
            let missing = task_data
                .inputs
                .iter()
                .find(|input| !input.exists() && !produced.contains(&path_key(input)));
            if let Some(input) = missing {
                warn!("Skipping task \"{}\"", task_data.description);
                debug!(
                    "Task input \"{}\" does not exist and will not be generated \
                     during task graph evaluation.",
                    display_relative(target_dir, input)
                );
                graph.node_mut(id).set_active(false);
                continue;
            }
            produced.extend(task_data.outputs.iter().map(|p| path_key(p)));
        }

        // Check input closures against the recorded digests
        for (index, task_data) in agenda.iter().enumerate() {
            let name = task_name(index);
            let inputs: BTreeSet<String> =
                task_data.inputs.iter().map(|p| path_key(p)).collect();
            let mut curr_closure = inputs.clone();
            for input in &inputs {
                if let Some(extra) = closures.get(input) {
                    curr_closure.extend(extra.iter().cloned());
                }
            }

            let recorded = cache.data.hashes.entry(name).or_default();
            let prev_closure: BTreeSet<String> = recorded.keys().cloned().collect();
            if prev_closure != curr_closure {
                graph.node_mut(index).set_valid(false);
                for stale in prev_closure.difference(&curr_closure) {
                    recorded.remove(stale);
                }
                for fresh in curr_closure.difference(&prev_closure) {
                    recorded.insert(fresh.clone(), hash::digest_file(Path::new(fresh))?);
                }
                continue;
            }

            let mut changed = false;
            let mut current = BTreeMap::new();
            for file in &curr_closure {
                let digest = hash::digest_file(Path::new(file))?;
                if recorded.get(file) != Some(&digest) {
                    changed = true;
                }
                current.insert(file.clone(), digest);
            }
            if changed {
                graph.node_mut(index).set_valid(false);
                *recorded = current;
            }
        }

        cache.flush()?;

        // Check output files
        for (index, task_data) in agenda.iter().enumerate() {
            if task_data.outputs.iter().all(|output| output.exists()) {
                continue;
            }
            graph.node_mut(index).set_valid(false);
        }
    }

    // Propagate invalidity and inactivity, then compile
    graph.propagate()?;
    let batches = schedule::compile(graph)?;
    Ok(batches
        .into_iter()
        .map(|batch| {
            batch
                .into_iter()
                .map(|sequence| {
                    sequence
                        .into_iter()
                        .map(|id| graph.node(id).work().clone())
                        .collect()
                })
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agenda::{self, Agenda};
    use crate::cache::{self, Cache, SharedCache};
    use crate::engine::{builder, closure};
    use crate::depend::CompiledDepend;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        agenda: CompiledAgenda,
        graph: TaskGraph,
        closures: FileClosures,
        cache: SharedCache,
    }

    fn fixture(yaml: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let agenda_src = Agenda::from_yaml(Path::new("agenda.yaml"), yaml).unwrap();
        let agenda = agenda::compile(dir.path(), &agenda_src).unwrap();
        let cache = cache::shared(Cache::load(dir.path().join("tickle.cache")).unwrap());
        let graph = builder::build_graph(dir.path(), &agenda, &cache).unwrap();
        let (_, closures) = closure::depend_closure(&agenda, &CompiledDepend::default()).unwrap();
        Fixture {
            dir,
            agenda,
            graph,
            closures,
            cache,
        }
    }

    fn schedule_sizes(fixture: &mut Fixture) -> Vec<usize> {
        let Fixture {
            dir,
            agenda,
            graph,
            closures,
            cache,
        } = fixture;
        make_schedule(dir.path(), graph, agenda, closures, cache)
            .unwrap()
            .iter()
            .map(|batch| batch.len())
            .collect()
    }

    const SINGLE: &str = r#"
procs:
  make: [touch, $out]
flows:
  f: [[make]]
tasks:
  - desc: make out
    proc: make
    flows: [f]
    args: { out: [out.txt] }
    inputs: []
    outputs: [out.txt]
"#;

    #[test]
    fn test_missing_output_schedules_once() {
        let mut fixture = fixture(SINGLE);
        assert_eq!(schedule_sizes(&mut fixture), vec![1]);

        // Produce the output; the next schedule must be empty.
        std::fs::write(fixture.dir.path().join("out.txt"), b"").unwrap();
        assert!(schedule_sizes(&mut fixture).is_empty());
    }

    #[test]
    fn test_invalidation_is_idempotent() {
        let mut fixture = fixture(SINGLE);
        std::fs::write(fixture.dir.path().join("out.txt"), b"").unwrap();
        assert!(schedule_sizes(&mut fixture).is_empty());
        assert!(schedule_sizes(&mut fixture).is_empty());
    }

    const CHAIN: &str = r#"
procs:
  copy: [cp, $src, $dst]
flows:
  f: [[copy]]
tasks:
  - desc: stage one
    proc: copy
    flows: [f]
    args: { src: [in.txt], dst: [mid.txt] }
    inputs: [in.txt]
    outputs: [mid.txt]
  - desc: stage two
    proc: copy
    flows: [f]
    args: { src: [mid.txt], dst: [out.txt] }
    inputs: [mid.txt]
    outputs: [out.txt]
"#;

    #[test]
    fn test_input_change_invalidates_transitively() {
        let mut fixture = fixture(CHAIN);
        std::fs::write(fixture.dir.path().join("in.txt"), b"v1").unwrap();

        // First pass: everything stale, one joined sequence.
        assert_eq!(schedule_sizes(&mut fixture), vec![1]);

        // Run the program for real so outputs and digests land.
        for id in [0usize, 1usize] {
            fixture.graph.node(id).work().perform().unwrap();
        }
        assert!(schedule_sizes(&mut fixture).is_empty());

        // Touching the root input re-schedules the whole chain.
        std::fs::write(fixture.dir.path().join("in.txt"), b"v2").unwrap();
        assert_eq!(schedule_sizes(&mut fixture), vec![1]);
    }

    #[test]
    fn test_missing_unproduced_input_deactivates() {
        let mut fixture = fixture(CHAIN);
        // in.txt does not exist and nothing produces it: both tasks are
        // impossible, the program is empty.
        assert!(schedule_sizes(&mut fixture).is_empty());
        assert!(!fixture.graph.node(0).active());
        assert!(!fixture.graph.node(1).active());
    }

    #[test]
    fn test_task_recovery_preserves_freshness() {
        let mut fixture = fixture(SINGLE);
        std::fs::write(fixture.dir.path().join("out.txt"), b"").unwrap();
        assert!(schedule_sizes(&mut fixture).is_empty());

        // Rename the description only: the fingerprint is unchanged, so
        // the recovered digests keep the task valid.
        let mut agenda_src =
            Agenda::from_yaml(Path::new("agenda.yaml"), SINGLE).unwrap();
        agenda_src.tasks[0].desc = "renamed".into();
        let agenda = agenda::compile(fixture.dir.path(), &agenda_src).unwrap();
        let graph =
            builder::build_graph(fixture.dir.path(), &agenda, &fixture.cache).unwrap();
        fixture.agenda = agenda;
        fixture.graph = graph;

        assert!(schedule_sizes(&mut fixture).is_empty());
    }

    #[test]
    fn test_task_recovery_survives_renumbering() {
        let mut fixture = fixture(CHAIN);
        std::fs::write(fixture.dir.path().join("in.txt"), b"v1").unwrap();
        assert_eq!(schedule_sizes(&mut fixture), vec![1]);
        for id in [0usize, 1usize] {
            fixture.graph.node(id).work().perform().unwrap();
        }
        assert!(schedule_sizes(&mut fixture).is_empty());

        // Swap the task order: indices renumber, fingerprints do not.
        let mut agenda_src = Agenda::from_yaml(Path::new("agenda.yaml"), CHAIN).unwrap();
        agenda_src.tasks.reverse();
        let agenda = agenda::compile(fixture.dir.path(), &agenda_src).unwrap();
        let graph =
            builder::build_graph(fixture.dir.path(), &agenda, &fixture.cache).unwrap();
        fixture.agenda = agenda;
        fixture.graph = graph;

        assert!(schedule_sizes(&mut fixture).is_empty());
    }

    #[test]
    fn test_args_edit_changes_identity_and_reruns() {
        let mut fixture = fixture(SINGLE);
        std::fs::write(fixture.dir.path().join("out.txt"), b"").unwrap();
        assert!(schedule_sizes(&mut fixture).is_empty());

        // Same outputs on disk, but the fingerprint moved: the closure
        // set still matches (empty), the output exists, so the task
        // stays valid. Point the args at a new output instead to force
        // identity and outputs apart.
        let mut agenda_src =
            Agenda::from_yaml(Path::new("agenda.yaml"), SINGLE).unwrap();
        agenda_src.tasks[0].args.insert("out".into(), vec!["other.txt".into()]);
        agenda_src.tasks[0].outputs = vec!["other.txt".into()];
        let agenda = agenda::compile(fixture.dir.path(), &agenda_src).unwrap();
        let graph =
            builder::build_graph(fixture.dir.path(), &agenda, &fixture.cache).unwrap();
        fixture.agenda = agenda;
        fixture.graph = graph;

        assert_eq!(schedule_sizes(&mut fixture), vec![1]);
    }

    #[test]
    fn test_depend_closure_extends_invalidation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("in.txt"), b"src").unwrap();
        std::fs::write(dir.path().join("dep.h"), b"v1").unwrap();

        let agenda_src = Agenda::from_yaml(
            Path::new("agenda.yaml"),
            r#"
procs:
  copy: [cp, $src, $dst]
flows:
  f: [[copy]]
tasks:
  - desc: build
    proc: copy
    flows: [f]
    args: { src: [in.txt], dst: [out.txt] }
    inputs: [in.txt]
    outputs: [out.txt]
"#,
        )
        .unwrap();
        let agenda = agenda::compile(dir.path(), &agenda_src).unwrap();
        let cache = cache::shared(Cache::load(dir.path().join("tickle.cache")).unwrap());
        let mut graph = builder::build_graph(dir.path(), &agenda, &cache).unwrap();

        let depend: CompiledDepend = [(
            dir.path().join("in.txt"),
            [dir.path().join("dep.h")].into_iter().collect(),
        )]
        .into_iter()
        .collect();
        let (_, closures) = closure::depend_closure(&agenda, &depend).unwrap();

        let first =
            make_schedule(dir.path(), &mut graph, &agenda, &closures, &cache).unwrap();
        assert_eq!(first.len(), 1);
        graph.node(0).work().perform().unwrap();
        assert!(
            make_schedule(dir.path(), &mut graph, &agenda, &closures, &cache)
                .unwrap()
                .is_empty()
        );

        // A change to the implicit dependency re-schedules the task even
        // though the explicit input is untouched.
        std::fs::write(dir.path().join("dep.h"), b"v2").unwrap();
        let third =
            make_schedule(dir.path(), &mut graph, &agenda, &closures, &cache).unwrap();
        assert_eq!(third.len(), 1);
    }
}
