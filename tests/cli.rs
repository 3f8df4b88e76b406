// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! End-to-end tests driving the tickle binary in temp directories

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn tickle(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tickle").unwrap();
    cmd.current_dir(dir);
    cmd
}

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

const PIPELINE: &str = r#"
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
fn version_mode_prints_the_version() {
    let dir = TempDir::new().unwrap();
    tickle(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn offline_without_agenda_fails() {
    let dir = TempDir::new().unwrap();
    tickle(dir.path()).arg("offline").assert().failure();
}

#[test]
fn offline_builds_the_pipeline_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "agenda.yaml", PIPELINE);
    write(dir.path(), "in.txt", "payload");

    tickle(dir.path()).arg("offline").assert().success();
    assert!(dir.path().join("mid.txt").exists());
    assert!(dir.path().join("out.txt").exists());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
        "payload"
    );

    // Second run finds everything fresh and does no work.
    let before = std::fs::metadata(dir.path().join("out.txt"))
        .unwrap()
        .modified()
        .unwrap();
    tickle(dir.path()).arg("offline").assert().success();
    let after = std::fs::metadata(dir.path().join("out.txt"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn offline_reruns_after_input_change() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "agenda.yaml", PIPELINE);
    write(dir.path(), "in.txt", "first");
    tickle(dir.path()).arg("offline").assert().success();

    write(dir.path(), "in.txt", "second");
    tickle(dir.path()).arg("offline").assert().success();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
        "second"
    );
}

#[test]
fn offline_task_failure_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "agenda.yaml",
        r#"
procs:
  fail: [cp, missing-source.txt, $dst]
flows:
  f: [[fail]]
tasks:
  - desc: doomed
    proc: fail
    flows: [f]
    args: { dst: [out.txt] }
    inputs: []
    outputs: [out.txt]
"#,
    );
    tickle(dir.path()).arg("offline").assert().failure();
}

#[test]
fn depend_cycle_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "agenda.yaml", PIPELINE);
    write(dir.path(), "in.txt", "payload");
    write(dir.path(), "depend.yaml", "a.h: [b.h]\nb.h: [a.h]\n");

    tickle(dir.path()).arg("offline").assert().failure();
}

#[test]
fn description_only_edit_does_no_work() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "agenda.yaml", PIPELINE);
    write(dir.path(), "in.txt", "payload");
    tickle(dir.path()).arg("offline").assert().success();

    // Rename a description: fingerprints are unchanged, so the second
    // run recovers the cached digests and performs no work.
    write(
        dir.path(),
        "agenda.yaml",
        &PIPELINE.replace("stage one", "renamed stage"),
    );
    let before = std::fs::metadata(dir.path().join("out.txt"))
        .unwrap()
        .modified()
        .unwrap();
    tickle(dir.path()).arg("offline").assert().success();
    let after = std::fs::metadata(dir.path().join("out.txt"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn clean_removes_outputs_and_cache() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "agenda.yaml", PIPELINE);
    write(dir.path(), "in.txt", "payload");
    tickle(dir.path()).arg("offline").assert().success();
    assert!(dir.path().join("tickle.cache").exists());

    tickle(dir.path()).arg("clean").assert().success();
    assert!(!dir.path().join("mid.txt").exists());
    assert!(!dir.path().join("out.txt").exists());
    assert!(!dir.path().join("tickle.cache").exists());
    assert!(dir.path().join("in.txt").exists());
}

#[test]
fn malformed_agenda_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "agenda.yaml", "procs: [broken\n");
    tickle(dir.path()).arg("offline").assert().failure();
}

#[test]
fn log_file_receives_messages() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "agenda.yaml", PIPELINE);
    write(dir.path(), "in.txt", "payload");
    tickle(dir.path()).arg("offline").assert().success();

    let log = std::fs::read_to_string(dir.path().join("tickle.log")).unwrap();
    assert!(log.contains("Beginning of evaluation in offline mode"));
    assert!(log.contains("stage one"));
    assert!(log.contains("End of evaluation in offline mode"));
}
