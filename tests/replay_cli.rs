//! Integration tests for the rastro binary replaying recorded traces

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const FIXTURE: &str = "tests/fixtures/simple_copy.jsonl";

#[test]
fn test_replay_fixture_to_stdout() {
    let mut cmd = Command::cargo_bin("rastro").unwrap();
    cmd.arg(FIXTURE)
        .assert()
        .success()
        .stdout(predicate::str::contains("x:4096:cp~7"))
        .stdout(predicate::str::contains("u:4096:cp~7:/data/in:100"))
        .stdout(predicate::str::contains("g:4096:cp~7:/data/out:100"))
        .stdout(predicate::str::contains("d:/data/out:/data/in"))
        .stdout(predicate::str::contains("q:4096:cp~7"))
        .stderr(predicate::str::contains("events replayed"));
}

#[test]
fn test_replay_fixture_to_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("prov.raw");

    let mut cmd = Command::cargo_bin("rastro").unwrap();
    cmd.arg(FIXTURE)
        .arg("-o")
        .arg(&out_path)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let out = fs::read_to_string(&out_path).unwrap();
    assert!(out.contains("d:/data/out:/data/in"));
    // Exactly one derivation edge and one end record for the fixture.
    assert_eq!(out.lines().filter(|l| l.starts_with("d:")).count(), 1);
    assert_eq!(out.lines().filter(|l| l.starts_with("q:")).count(), 1);
}

#[test]
fn test_replay_from_stdin() {
    let trace = fs::read_to_string(FIXTURE).unwrap();
    let mut cmd = Command::cargo_bin("rastro").unwrap();
    cmd.write_stdin(trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("d:/data/out:/data/in"));
}

#[test]
fn test_missing_trace_file_is_fatal() {
    let mut cmd = Command::cargo_bin("rastro").unwrap();
    cmd.arg("does/not/exist.jsonl")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open trace"));
}

#[test]
fn test_malformed_lines_survive() {
    let mut cmd = Command::cargo_bin("rastro").unwrap();
    cmd.write_stdin("garbage line\n{\"event\":\"tick\",\"n\":1}\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("1 skipped"));
}
