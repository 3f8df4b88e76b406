// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Evaluation drivers
//!
//! The drivers own the cache, the watcher and the task graph, and react
//! to file events by pausing the evaluator, recomputing dependencies
//! and the schedule, reprogramming and resuming. Offline mode appends a
//! terminator task and runs until all feasible work is done; online
//! mode keeps evaluating and additionally watches every explicit and
//! implicit source file.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::builder;
use super::closure::{self, FileClosures};
use super::evaluator::{ErrorDisposition, Evaluator};
use super::invalidate;
use crate::agenda::{self, Agenda, CompiledAgenda};
use crate::cache::{self, hash, Cache, Digest, SharedCache};
use crate::depend::{self, CompiledDepend, Depend};
use crate::errors::{TaskError, TickleError, TickleResult};
use crate::graph::{TaskGraph, WorkUnit};
use crate::utils::paths::{display_relative, path_key};
use crate::watch::{FileEvent, FileWatcher};

/// Pause the evaluator, retrying through its own short-lived error
/// recovery pause.
fn pause_with_retry(evaluator: &Evaluator) -> TickleResult<()> {
    for _ in 0..100 {
        if evaluator.pause().is_ok() {
            return Ok(());
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    evaluator.pause()
}

// ─────────────────────────────────────────────────────────────────────────
// Offline driver
// ─────────────────────────────────────────────────────────────────────────

struct OfflineState {
    agenda: CompiledAgenda,
    graph: TaskGraph,
    depend_digest: Option<Digest>,
}

struct OfflineInner {
    target_dir: PathBuf,
    depend_path: PathBuf,
    evaluator: Evaluator,
    watcher: FileWatcher,
    cache: SharedCache,
    state: Mutex<OfflineState>,
    fatal: Mutex<Option<TickleError>>,
}

/// One-shot evaluation: run everything stale, then stop.
///
/// The depend file stays watched while running, so dynamic dependencies
/// discovered by in-flight tasks reschedule the remainder.
pub struct OfflineDriver {
    inner: Arc<OfflineInner>,
}

impl OfflineDriver {
    pub fn new(
        target_dir: PathBuf,
        agenda_path: PathBuf,
        depend_path: PathBuf,
        cache_path: PathBuf,
        worker_count: usize,
    ) -> TickleResult<Self> {
        let evaluator = Evaluator::new(worker_count, Box::new(|_| ErrorDisposition::Halt));
        let cache = cache::shared(Cache::load(cache_path)?);
        let watcher = FileWatcher::new();

        let agenda_src = Agenda::load(&agenda_path)?;
        let agenda_data = agenda::compile(&target_dir, &agenda_src)?;
        let mut graph = builder::build_graph(&target_dir, &agenda_data, &cache)?;

        // Terminator: always stale, always runnable, after every task.
        let stopper = evaluator.clone();
        let terminator = WorkUnit::new("terminate evaluation", move || {
            stopper
                .stop()
                .map_err(|e| TaskError::new("terminate evaluation", e.to_string()))?;
            Ok(None)
        });
        let terminator_id = graph.add_node(BTreeMap::new(), terminator, true);
        for id in 0..terminator_id {
            graph.add_dependency(terminator_id, id)?;
        }

        let depend_digest = hash::digest_file(&depend_path)?;
        let inner = Arc::new(OfflineInner {
            target_dir,
            depend_path: depend_path.clone(),
            evaluator,
            watcher,
            cache,
            state: Mutex::new(OfflineState {
                agenda: agenda_data,
                graph,
                depend_digest,
            }),
            fatal: Mutex::new(None),
        });

        offline_update_depend(&inner)?;

        // Online reload of the depend map only
        let weak = Arc::downgrade(&inner);
        inner.watcher.subscribe(
            &depend_path,
            Box::new(move |_event| {
                if let Some(inner) = weak.upgrade() {
                    offline_depend_event(&inner);
                }
            }),
        )?;

        Ok(Self { inner })
    }

    /// Run to completion. Blocks until the terminator fires or a task
    /// fails.
    pub fn run(&self) -> TickleResult<()> {
        info!("Beginning of evaluation in offline mode");
        self.inner.watcher.start()?;
        let result = self.inner.evaluator.start();
        self.inner.watcher.stop();

        if let Some(fatal) = self.inner.fatal.lock().take() {
            info!("Failed evaluation in offline mode");
            return Err(fatal);
        }
        match result {
            Ok(()) => {
                info!("End of evaluation in offline mode");
                Ok(())
            }
            Err(error) => {
                info!("Failed evaluation in offline mode");
                Err(error)
            }
        }
    }
}

fn offline_depend_event(inner: &Arc<OfflineInner>) {
    let digest = match hash::digest_file(&inner.depend_path) {
        Ok(digest) => digest,
        Err(error) => {
            warn!("failed to hash depend file: {error}");
            return;
        }
    };
    {
        let mut state = inner.state.lock();
        if state.depend_digest == digest {
            return;
        }
        state.depend_digest = digest;
    }
    info!(
        "{} was modified, rescheduling",
        display_relative(&inner.target_dir, &inner.depend_path)
    );

    if let Err(error) = pause_with_retry(&inner.evaluator) {
        warn!("could not pause for rescheduling: {error}");
        return;
    }
    let result = offline_update_depend(inner);
    if let Err(error) = inner.evaluator.resume() {
        error!("could not resume after rescheduling: {error}");
    }
    if let Err(error) = result {
        offline_fail(inner, error);
    }
}

fn offline_update_depend(inner: &Arc<OfflineInner>) -> TickleResult<()> {
    let depend_src = if inner.depend_path.exists() {
        depend::load(&inner.depend_path)?
    } else {
        Depend::default()
    };
    let depend_data = depend::compile(&inner.target_dir, &depend_src);

    let mut state = inner.state.lock();
    let state = &mut *state;
    let (_, closures) = closure::depend_closure(&state.agenda, &depend_data)?;
    let program = invalidate::make_schedule(
        &inner.target_dir,
        &mut state.graph,
        &state.agenda,
        &closures,
        &inner.cache,
    )?;
    inner.evaluator.reprogram(program)
}

fn offline_fail(inner: &Arc<OfflineInner>, error: TickleError) {
    error!("{error}");
    *inner.fatal.lock() = Some(error);
    let _ = inner.evaluator.stop();
}

// ─────────────────────────────────────────────────────────────────────────
// Online driver
// ─────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct OnlineState {
    agenda: CompiledAgenda,
    graph: TaskGraph,
    depend: CompiledDepend,
    closures: FileClosures,
    explicits: BTreeSet<String>,
    implicits: BTreeSet<String>,
    agenda_digest: Option<Digest>,
    depend_digest: Option<Digest>,
    source_digests: HashMap<String, Option<Digest>>,
}

struct OnlineInner {
    target_dir: PathBuf,
    agenda_path: PathBuf,
    depend_path: PathBuf,
    evaluator: Evaluator,
    watcher: FileWatcher,
    cache: SharedCache,
    state: Mutex<OnlineState>,
    fatal: Mutex<Option<TickleError>>,
}

/// Persistent evaluation: rebuild and reschedule as the agenda, the
/// depend map or any source file changes.
#[derive(Clone)]
pub struct OnlineDriver {
    inner: Arc<OnlineInner>,
}

impl OnlineDriver {
    pub fn new(
        target_dir: PathBuf,
        agenda_path: PathBuf,
        depend_path: PathBuf,
        cache_path: PathBuf,
        worker_count: usize,
    ) -> TickleResult<Self> {
        let evaluator = Evaluator::new(
            worker_count,
            Box::new(|task_error| {
                error!(
                    "Task \"{}\" failed with message:\n{}",
                    task_error.description, task_error.stderr
                );
                ErrorDisposition::DiscardProgram
            }),
        );
        let cache = cache::shared(Cache::load(cache_path)?);
        let watcher = FileWatcher::new();

        let inner = Arc::new(OnlineInner {
            target_dir,
            agenda_path: agenda_path.clone(),
            depend_path: depend_path.clone(),
            evaluator,
            watcher,
            cache,
            state: Mutex::new(OnlineState::default()),
            fatal: Mutex::new(None),
        });
        {
            let mut state = inner.state.lock();
            state.agenda_digest = hash::digest_file(&agenda_path)?;
            state.depend_digest = hash::digest_file(&depend_path)?;
        }
        online_update_agenda(&inner)?;

        let weak = Arc::downgrade(&inner);
        inner.watcher.subscribe(
            &agenda_path,
            Box::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    online_agenda_event(&inner, event);
                }
            }),
        )?;
        let weak = Arc::downgrade(&inner);
        inner.watcher.subscribe(
            &depend_path,
            Box::new(move |_event| {
                if let Some(inner) = weak.upgrade() {
                    online_depend_event(&inner);
                }
            }),
        )?;

        Ok(Self { inner })
    }

    /// Run until stopped. Task failures are logged and retried on the
    /// next relevant file event; schema or consistency failures after
    /// an edit are fatal.
    pub fn run(&self) -> TickleResult<()> {
        info!("Beginning of evaluation in online mode");
        self.inner.watcher.start()?;
        let result = self.inner.evaluator.start();
        self.inner.watcher.stop();
        info!("End of evaluation in online mode");

        if let Some(fatal) = self.inner.fatal.lock().take() {
            return Err(fatal);
        }
        result
    }

    /// Ask the evaluator to wind down; the front end calls this from
    /// its signal handler.
    pub fn stop(&self) {
        let _ = self.inner.evaluator.stop();
    }
}

fn online_agenda_event(inner: &Arc<OnlineInner>, event: FileEvent) {
    if event == FileEvent::Deleted {
        warn!("agenda file deleted; keeping the current agenda");
        return;
    }
    let digest = match hash::digest_file(&inner.agenda_path) {
        Ok(digest) => digest,
        Err(error) => {
            warn!("failed to hash agenda file: {error}");
            return;
        }
    };
    {
        let mut state = inner.state.lock();
        if state.agenda_digest == digest {
            return;
        }
        state.agenda_digest = digest;
    }
    info!(
        "{} was modified, rescheduling",
        display_relative(&inner.target_dir, &inner.agenda_path)
    );
    online_reschedule(inner, online_update_agenda);
}

fn online_depend_event(inner: &Arc<OnlineInner>) {
    let digest = match hash::digest_file(&inner.depend_path) {
        Ok(digest) => digest,
        Err(error) => {
            warn!("failed to hash depend file: {error}");
            return;
        }
    };
    {
        let mut state = inner.state.lock();
        if state.depend_digest == digest {
            return;
        }
        state.depend_digest = digest;
    }
    info!(
        "{} was modified, rescheduling",
        display_relative(&inner.target_dir, &inner.depend_path)
    );
    online_reschedule(inner, online_update_depend);
}

fn online_source_event(inner: &Arc<OnlineInner>, path: &Path, _event: FileEvent) {
    let key = path_key(path);
    let digest = match hash::digest_file(path) {
        Ok(digest) => digest,
        Err(error) => {
            warn!("failed to hash source file: {error}");
            return;
        }
    };
    {
        let mut state = inner.state.lock();
        match state.source_digests.get_mut(&key) {
            Some(stored) if *stored == digest => return,
            Some(stored) => *stored = digest,
            None => {}
        }
    }
    info!(
        "{} was modified, rescheduling",
        display_relative(&inner.target_dir, path)
    );
    online_reschedule(inner, online_update_source);
}

/// Pause, apply an update, resume; escalate update failures.
fn online_reschedule(
    inner: &Arc<OnlineInner>,
    update: fn(&Arc<OnlineInner>) -> TickleResult<()>,
) {
    if let Err(error) = pause_with_retry(&inner.evaluator) {
        warn!("could not pause for rescheduling: {error}");
        return;
    }
    let result = update(inner);
    if let Err(error) = inner.evaluator.resume() {
        error!("could not resume after rescheduling: {error}");
    }
    if let Err(error) = result {
        online_fail(inner, error);
    }
}

fn online_fail(inner: &Arc<OnlineInner>, error: TickleError) {
    error!("{error}");
    *inner.fatal.lock() = Some(error);
    let _ = inner.evaluator.stop();
}

/// Source files the agenda names that no task produces.
fn agenda_explicits(agenda_data: &CompiledAgenda) -> BTreeSet<String> {
    let mut inputs: BTreeSet<String> = BTreeSet::new();
    let mut outputs: BTreeSet<String> = BTreeSet::new();
    for task_data in agenda_data {
        inputs.extend(task_data.inputs.iter().map(|p| path_key(p)));
        outputs.extend(task_data.outputs.iter().map(|p| path_key(p)));
    }
    inputs.difference(&outputs).cloned().collect()
}

/// Bring the watched source set in line with the current explicit and
/// implicit files, priming digests for newly watched paths.
fn update_subscriptions(
    inner: &Arc<OnlineInner>,
    state: &mut OnlineState,
    explicits: BTreeSet<String>,
    implicits: BTreeSet<String>,
) -> TickleResult<()> {
    let old: BTreeSet<String> = state.explicits.union(&state.implicits).cloned().collect();
    let new: BTreeSet<String> = explicits.union(&implicits).cloned().collect();

    for path in old.difference(&new) {
        inner.watcher.unsubscribe(Path::new(path));
        state.source_digests.remove(path);
    }
    for path in new.difference(&old) {
        let source = PathBuf::from(path);
        let weak = Arc::downgrade(inner);
        let callback_path = source.clone();
        inner.watcher.subscribe(
            &source,
            Box::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    online_source_event(&inner, &callback_path, event);
                }
            }),
        )?;
        state
            .source_digests
            .insert(path.clone(), hash::digest_file(&source)?);
    }

    state.explicits = explicits;
    state.implicits = implicits;
    Ok(())
}

/// Full rebuild: agenda, graph, depend closures, subscriptions, schedule.
fn online_update_agenda(inner: &Arc<OnlineInner>) -> TickleResult<()> {
    let agenda_src = Agenda::load(&inner.agenda_path)?;
    let agenda_data = agenda::compile(&inner.target_dir, &agenda_src)?;
    let depend_src = if inner.depend_path.exists() {
        depend::load(&inner.depend_path)?
    } else {
        Depend::default()
    };
    let depend_data = depend::compile(&inner.target_dir, &depend_src);

    let graph = builder::build_graph(&inner.target_dir, &agenda_data, &inner.cache)?;
    let (implicits, closures) = closure::depend_closure(&agenda_data, &depend_data)?;
    let explicits = agenda_explicits(&agenda_data);

    let mut state = inner.state.lock();
    let state = &mut *state;
    state.agenda = agenda_data;
    state.graph = graph;
    state.depend = depend_data;
    state.closures = closures;
    update_subscriptions(inner, state, explicits, implicits)?;

    let program = invalidate::make_schedule(
        &inner.target_dir,
        &mut state.graph,
        &state.agenda,
        &state.closures,
        &inner.cache,
    )?;
    inner.evaluator.reprogram(program)
}

/// Depend-only rebuild: closures, subscriptions, schedule.
fn online_update_depend(inner: &Arc<OnlineInner>) -> TickleResult<()> {
    let depend_src = if inner.depend_path.exists() {
        depend::load(&inner.depend_path)?
    } else {
        Depend::default()
    };
    let depend_data = depend::compile(&inner.target_dir, &depend_src);

    let mut state = inner.state.lock();
    let state = &mut *state;
    let (implicits, closures) = closure::depend_closure(&state.agenda, &depend_data)?;
    state.depend = depend_data;
    state.closures = closures;
    let explicits = state.explicits.clone();
    update_subscriptions(inner, state, explicits, implicits)?;

    let program = invalidate::make_schedule(
        &inner.target_dir,
        &mut state.graph,
        &state.agenda,
        &state.closures,
        &inner.cache,
    )?;
    inner.evaluator.reprogram(program)
}

/// Source-only rebuild: schedule.
fn online_update_source(inner: &Arc<OnlineInner>) -> TickleResult<()> {
    let mut state = inner.state.lock();
    let state = &mut *state;
    let program = invalidate::make_schedule(
        &inner.target_dir,
        &mut state.graph,
        &state.agenda,
        &state.closures,
        &inner.cache,
    )?;
    inner.evaluator.reprogram(program)
}

// ─────────────────────────────────────────────────────────────────────────
// Clean mode
// ─────────────────────────────────────────────────────────────────────────

/// Remove everything evaluation generated: tracked files, then tracked
/// folders that ended up empty, then the cache itself.
pub fn clean(target_dir: &Path, cache_path: &Path) -> TickleResult<()> {
    if !cache_path.exists() {
        return Ok(());
    }
    let cache_data = Cache::load(cache_path)?;

    info!("Beginning of clean mode");

    for file in cache_data.data.files.iter().rev() {
        let path = Path::new(file);
        if !path.exists() {
            continue;
        }
        info!("Removing {}", display_relative(target_dir, path));
        std::fs::remove_file(path)?;
    }

    for folder in cache_data.data.folders.iter().rev() {
        let path = Path::new(folder);
        if !path.exists() {
            continue;
        }
        if std::fs::read_dir(path)?.next().is_some() {
            continue;
        }
        info!("Removing {}", display_relative(target_dir, path));
        std::fs::remove_dir(path)?;
    }

    info!("Removing {}", display_relative(target_dir, cache_path));
    std::fs::remove_file(cache_path)?;

    info!("End of clean mode");
    Ok(())
}
