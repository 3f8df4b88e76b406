// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Per-file subscription adapter over the platform file watcher
//!
//! Subscribers register a callback for a single file; the adapter
//! watches the file's parent directory non-recursively (refcounted per
//! directory) and routes events to the matching callback. The backend
//! may coalesce events; drivers therefore suppress spurious deliveries
//! by comparing content digests, so callbacks only need to be
//! idempotent.

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::TickleResult;

/// Event kinds delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    Created,
    Modified,
    Moved,
    Deleted,
}

/// Subscriber callback; invoked from the watcher thread
pub type EventCallback = Box<dyn Fn(FileEvent) + Send + Sync>;

#[derive(Default)]
struct WatcherState {
    callbacks: HashMap<PathBuf, Arc<EventCallback>>,
    dir_counts: HashMap<PathBuf, usize>,
    backend: Option<RecommendedWatcher>,
}

struct WatcherShared {
    state: Mutex<WatcherState>,
}

/// File watcher with per-file callbacks
#[derive(Clone)]
pub struct FileWatcher {
    shared: Arc<WatcherShared>,
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FileWatcher {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(WatcherShared {
                state: Mutex::new(WatcherState::default()),
            }),
        }
    }

    /// Register a callback for a single file. Re-subscribing an already
    /// subscribed path is a no-op.
    pub fn subscribe(&self, path: &Path, callback: EventCallback) -> TickleResult<()> {
        let mut state = self.shared.state.lock();
        if state.callbacks.contains_key(path) {
            return Ok(());
        }
        state
            .callbacks
            .insert(path.to_path_buf(), Arc::new(callback));

        let dir = watch_dir(path);
        let count = state.dir_counts.entry(dir.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            if let Some(backend) = state.backend.as_mut() {
                backend.watch(&dir, RecursiveMode::NonRecursive)?;
            }
        }
        Ok(())
    }

    /// Drop a file's callback, unwatching its directory when it was the
    /// last subscriber there.
    pub fn unsubscribe(&self, path: &Path) {
        let mut state = self.shared.state.lock();
        if state.callbacks.remove(path).is_none() {
            return;
        }
        let dir = watch_dir(path);
        if let Some(count) = state.dir_counts.get_mut(&dir) {
            *count -= 1;
            if *count == 0 {
                state.dir_counts.remove(&dir);
                if let Some(backend) = state.backend.as_mut() {
                    let _ = backend.unwatch(&dir);
                }
            }
        }
    }

    /// Start delivering events. Directories subscribed beforehand are
    /// registered with the backend now.
    pub fn start(&self) -> TickleResult<()> {
        let mut state = self.shared.state.lock();
        if state.backend.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let mut backend =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                match result {
                    Ok(event) => dispatch(&shared, &event),
                    Err(error) => warn!("file watcher error: {error}"),
                }
            })?;
        for dir in state.dir_counts.keys() {
            backend.watch(dir, RecursiveMode::NonRecursive)?;
        }
        state.backend = Some(backend);
        Ok(())
    }

    /// Stop delivering events; subscriptions survive for a later start.
    pub fn stop(&self) {
        // Drop the backend outside the lock: tearing it down may wait
        // for its event thread, which could be blocked on the lock in
        // dispatch.
        let backend = self.shared.state.lock().backend.take();
        drop(backend);
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn dispatch(shared: &WatcherShared, event: &notify::Event) {
    let kind = match event.kind {
        EventKind::Create(_) => FileEvent::Created,
        EventKind::Modify(ModifyKind::Name(_)) => FileEvent::Moved,
        EventKind::Modify(_) => FileEvent::Modified,
        EventKind::Remove(_) => FileEvent::Deleted,
        _ => return,
    };
    for path in &event.paths {
        if path.is_dir() {
            continue;
        }
        // Take the callback out under the lock, invoke without it:
        // callbacks re-enter subscribe/unsubscribe.
        let callback = shared.state.lock().callbacks.get(path).cloned();
        if let Some(callback) = callback {
            debug!("file event {:?}: {}", kind, path.display());
            callback(kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_refcounts_directories() {
        let watcher = FileWatcher::new();
        watcher
            .subscribe(Path::new("/work/a.txt"), Box::new(|_| {}))
            .unwrap();
        watcher
            .subscribe(Path::new("/work/b.txt"), Box::new(|_| {}))
            .unwrap();
        {
            let state = watcher.shared.state.lock();
            assert_eq!(state.dir_counts[Path::new("/work")], 2);
        }

        watcher.unsubscribe(Path::new("/work/a.txt"));
        {
            let state = watcher.shared.state.lock();
            assert_eq!(state.dir_counts[Path::new("/work")], 1);
        }
        watcher.unsubscribe(Path::new("/work/b.txt"));
        assert!(watcher.shared.state.lock().dir_counts.is_empty());
    }

    #[test]
    fn test_resubscribe_is_noop() {
        let watcher = FileWatcher::new();
        watcher
            .subscribe(Path::new("/work/a.txt"), Box::new(|_| {}))
            .unwrap();
        watcher
            .subscribe(Path::new("/work/a.txt"), Box::new(|_| {}))
            .unwrap();
        assert_eq!(
            watcher.shared.state.lock().dir_counts[Path::new("/work")],
            1
        );
    }

    #[test]
    fn test_dispatch_routes_to_matching_callback() {
        let watcher = FileWatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            watcher
                .subscribe(
                    Path::new("/work/watched.txt"),
                    Box::new(move |event| {
                        assert_eq!(event, FileEvent::Modified);
                        hits.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }

        let event = notify::Event {
            kind: EventKind::Modify(ModifyKind::Data(
                notify::event::DataChange::Content,
            )),
            paths: vec![
                PathBuf::from("/work/watched.txt"),
                PathBuf::from("/work/other.txt"),
            ],
            attrs: Default::default(),
        };
        dispatch(&watcher.shared, &event);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribed_paths_are_ignored() {
        let watcher = FileWatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            watcher
                .subscribe(
                    Path::new("/work/watched.txt"),
                    Box::new(move |_| {
                        hits.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }
        watcher.unsubscribe(Path::new("/work/watched.txt"));

        let event = notify::Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/work/watched.txt")],
            attrs: Default::default(),
        };
        dispatch(&watcher.shared, &event);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
