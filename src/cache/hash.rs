// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Content hashing for invalidation and task identity
//!
//! Uses BLAKE3 for file digests and for the 128-bit task fingerprint
//! that recovers task identity across agenda edits.

use blake3::Hasher;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::agenda::TaskDef;
use crate::errors::{TickleError, TickleResult};

/// Hex-encoded BLAKE3 digest of a file's contents
pub type Digest = String;

/// How often a waiting digest re-checks for the file to appear
const WAIT_POLL: Duration = Duration::from_millis(250);

/// Digest a file's contents, or `None` when the file does not exist.
///
/// `None` is the missing-file sentinel: comparing equal to a stored
/// `None` means "still missing", which is not a change.
pub fn digest_file(path: &Path) -> TickleResult<Option<Digest>> {
    match std::fs::read(path) {
        Ok(content) => {
            let mut hasher = Hasher::new();
            hasher.update(&content);
            Ok(Some(hasher.finalize().to_hex().to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TickleError::Io {
            message: format!("failed to read '{}': {}", path.display(), e),
        }),
    }
}

/// Digest a file, blocking until it exists.
///
/// Used after a task succeeds to re-hash tracked inputs: a sibling task
/// may still be flushing an output this task consumed.
pub fn digest_file_wait(path: &Path) -> TickleResult<Digest> {
    loop {
        if let Some(digest) = digest_file(path)? {
            return Ok(digest);
        }
        thread::sleep(WAIT_POLL);
    }
}

/// Stable 128-bit fingerprint of a task definition.
///
/// Covers proc, args, flows, inputs and outputs (the latter three
/// sorted) but not the description, so description-only edits preserve
/// task identity and recover cached input digests.
pub fn fingerprint_task(task: &TaskDef) -> String {
    let mut hasher = Hasher::new();

    let mut update = |field: &str, value: &str| {
        hasher.update(field.as_bytes());
        hasher.update(&[0]);
        hasher.update(value.as_bytes());
        hasher.update(&[0]);
    };

    update("proc", &task.proc);
    for (name, values) in &task.args {
        update("arg", name);
        for value in values {
            update("value", value);
        }
    }
    let mut sorted = |items: &[String]| {
        let mut items = items.to_vec();
        items.sort();
        items
    };
    for flow in sorted(&task.flows) {
        update("flow", &flow);
    }
    for input in sorted(&task.inputs) {
        update("input", &input);
    }
    for output in sorted(&task.outputs) {
        update("output", &output);
    }

    let hash = hasher.finalize();
    hash.as_bytes()[..16]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn make_task(desc: &str, args: &[(&str, &[&str])]) -> TaskDef {
        TaskDef {
            desc: desc.into(),
            proc: "build".into(),
            flows: vec!["flow".into()],
            args: args
                .iter()
                .map(|(k, vs)| {
                    (
                        k.to_string(),
                        vs.iter().map(|v| v.to_string()).collect(),
                    )
                })
                .collect::<BTreeMap<_, _>>(),
            inputs: vec!["in.txt".into()],
            outputs: vec!["out.txt".into()],
        }
    }

    #[test]
    fn test_digest_file_missing_is_none() {
        assert_eq!(digest_file(Path::new("/no/such/file")).unwrap(), None);
    }

    #[test]
    fn test_digest_file_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, b"content").unwrap();

        let first = digest_file(&path).unwrap();
        let second = digest_file(&path).unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);

        std::fs::write(&path, b"changed").unwrap();
        assert_ne!(first, digest_file(&path).unwrap());
    }

    #[test]
    fn test_fingerprint_ignores_description() {
        let a = make_task("first description", &[("msg", &["hi"])]);
        let b = make_task("second description", &[("msg", &["hi"])]);
        assert_eq!(fingerprint_task(&a), fingerprint_task(&b));
    }

    #[test]
    fn test_fingerprint_covers_args() {
        let a = make_task("same", &[("msg", &["hi"])]);
        let b = make_task("same", &[("msg", &["bye"])]);
        assert_ne!(fingerprint_task(&a), fingerprint_task(&b));
    }

    #[test]
    fn test_fingerprint_is_128_bit_hex() {
        let task = make_task("t", &[]);
        assert_eq!(fingerprint_task(&task).len(), 32);
    }
}
