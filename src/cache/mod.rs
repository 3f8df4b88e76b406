// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Inter-run persistent cache
//!
//! Tracks generated files and folders, task identity recovery and the
//! per-task input digest closures. The on-disk representation is a
//! single JSON document written atomically (write-tmp-then-rename);
//! keys this version does not know about are preserved across flushes.

pub mod hash;

pub use hash::Digest;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{TickleError, TickleResult};

/// Cache contents keyed the way the engine reads them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheData {
    /// Output files ever generated by the engine
    #[serde(default)]
    pub files: BTreeSet<String>,

    /// Directories ever created by the engine
    #[serde(default)]
    pub folders: BTreeSet<String>,

    /// Previous run's task name by content fingerprint
    #[serde(default)]
    pub recover: BTreeMap<String, String>,

    /// Closure of input digests last observed for each task
    #[serde(default)]
    pub hashes: BTreeMap<String, BTreeMap<String, Option<Digest>>>,

    /// Keys written by other versions, preserved verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Persistent cache bound to an on-disk location
#[derive(Debug)]
pub struct Cache {
    path: PathBuf,
    pub data: CacheData,
}

impl Cache {
    /// Load the cache from disk, or start empty when the file is missing.
    pub fn load(path: impl Into<PathBuf>) -> TickleResult<Self> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| {
                TickleError::cache(format!("failed to read '{}': {}", path.display(), e))
            })?;
            serde_json::from_slice(&bytes).map_err(|e| {
                TickleError::cache(format!("failed to parse '{}': {}", path.display(), e))
            })?
        } else {
            CacheData::default()
        };
        Ok(Self { path, data })
    }

    /// Cache file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the cache to disk atomically with respect to process crash.
    pub fn flush(&self) -> TickleResult<()> {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_vec(&self.data)
            .map_err(|e| TickleError::cache(format!("failed to serialize cache: {e}")))?;
        std::fs::write(&tmp, json).map_err(|e| {
            TickleError::cache(format!("failed to write '{}': {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            TickleError::cache(format!("failed to replace '{}': {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

/// Cache handle shared between the driver and worker closures
pub type SharedCache = Arc<Mutex<Cache>>;

/// Wrap a cache for shared access.
pub fn shared(cache: Cache) -> SharedCache {
    Arc::new(Mutex::new(cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::load(dir.path().join("tickle.cache")).unwrap();
        assert!(cache.data.files.is_empty());
        assert!(cache.data.hashes.is_empty());
    }

    #[test]
    fn test_flush_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tickle.cache");

        let mut cache = Cache::load(&path).unwrap();
        cache.data.files.insert("/work/out.txt".into());
        cache.data.folders.insert("/work/out".into());
        cache.data.recover.insert("abc123".into(), "task0".into());
        cache
            .data
            .hashes
            .entry("task0".into())
            .or_default()
            .insert("/work/in.txt".into(), Some("deadbeef".into()));
        cache
            .data
            .hashes
            .entry("task1".into())
            .or_default()
            .insert("/work/gone.txt".into(), None);
        cache.flush().unwrap();

        let reloaded = Cache::load(&path).unwrap();
        assert_eq!(reloaded.data.files, cache.data.files);
        assert_eq!(reloaded.data.folders, cache.data.folders);
        assert_eq!(reloaded.data.recover, cache.data.recover);
        assert_eq!(reloaded.data.hashes, cache.data.hashes);
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tickle.cache");
        std::fs::write(
            &path,
            r#"{"files":[],"future_key":{"nested":[1,2,3]}}"#,
        )
        .unwrap();

        let mut cache = Cache::load(&path).unwrap();
        cache.data.files.insert("/work/new.txt".into());
        cache.flush().unwrap();

        let reloaded = Cache::load(&path).unwrap();
        assert!(reloaded.data.extra.contains_key("future_key"));
        assert!(reloaded.data.files.contains("/work/new.txt"));
    }

    #[test]
    fn test_flush_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tickle.cache");
        let cache = Cache::load(&path).unwrap();
        cache.flush().unwrap();

        assert!(path.exists());
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
