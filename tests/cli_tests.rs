//! End-to-end tests of the memtrace binary
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

mod utils;

use assert_cmd::Command;
use memtrace::event::{EventKind, MODULE_SENTINEL};
use memtrace::profile::ProfileDocument;
use predicates::prelude::*;
use utils::{compile_fixture, compile_fixture_stripped, fixture_source, line_of};

fn memtrace() -> Command {
    Command::cargo_bin("memtrace").unwrap()
}

#[test]
fn test_json_format_prints_profile() {
    let (dir, bin) = compile_fixture("fib");
    let output = memtrace()
        .current_dir(dir.path())
        .arg("--format")
        .arg("json")
        .arg("--")
        .arg(&bin)
        .output()
        .unwrap();
    assert!(output.status.success());

    let doc: ProfileDocument = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc.program_name, bin.display().to_string());
    assert_eq!(doc.total_events, doc.code_events.len());

    let first = &doc.code_events[0];
    assert_eq!(first.kind, EventKind::Line);
    assert_eq!(first.function, MODULE_SENTINEL);
    assert_eq!(first.line, line_of(&fixture_source("fib"), "let values"));

    // The target's own output is kept off stdout
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("10945"));
}

#[test]
fn test_program_name_override() {
    let (dir, bin) = compile_fixture("fib");
    memtrace()
        .current_dir(dir.path())
        .args(["--format", "json", "--program-name", "foo.py", "--"])
        .arg(&bin)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"programName\": \"foo.py\""));
}

#[test]
fn test_no_serve_prints_summary() {
    let (dir, bin) = compile_fixture("fib");
    memtrace()
        .current_dir(dir.path())
        .arg("--no-serve")
        .arg("--")
        .arg(&bin)
        .assert()
        .success()
        .stderr(predicate::str::contains("Memory Profile"))
        .stderr(predicate::str::contains("Peak RSS"));
}

#[test]
fn test_events_flag_selects_kinds() {
    let (dir, bin) = compile_fixture("fib");
    let output = memtrace()
        .current_dir(dir.path())
        .args(["--format", "json", "--events", "calls", "--"])
        .arg(&bin)
        .output()
        .unwrap();
    assert!(output.status.success());

    let doc: ProfileDocument = serde_json::from_slice(&output.stdout).unwrap();
    assert!(!doc.code_events.is_empty());
    assert!(doc
        .code_events
        .iter()
        .all(|e| matches!(e.kind, EventKind::Call | EventKind::Return)));
}

#[test]
fn test_invalid_events_expression() {
    let (dir, bin) = compile_fixture("fib");
    memtrace()
        .current_dir(dir.path())
        .args(["--events", "opcode", "--"])
        .arg(&bin)
        .assert()
        .failure()
        .stderr(predicate::str::contains("opcode"));
}

#[test]
fn test_config_file_is_read() {
    let (dir, bin) = compile_fixture("fib");
    std::fs::write(
        dir.path().join("memtrace.toml"),
        "[trace]\nprogram_name = \"from-config\"\n",
    )
    .unwrap();
    memtrace()
        .current_dir(dir.path())
        .args(["--format", "json", "--"])
        .arg(&bin)
        .assert()
        .success()
        .stdout(predicate::str::contains("from-config"));
}

#[test]
fn test_nonexistent_program() {
    memtrace()
        .args(["--no-serve", "--", "/nonexistent/memtrace-target"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_missing_debug_info() {
    let (dir, bin) = compile_fixture_stripped("fib");
    memtrace()
        .current_dir(dir.path())
        .arg("--no-serve")
        .arg("--")
        .arg(&bin)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Missing debug info"));
}

#[test]
fn test_failing_target_is_an_error_by_default() {
    let (dir, bin) = compile_fixture("explode");
    memtrace()
        .current_dir(dir.path())
        .arg("--no-serve")
        .arg("--")
        .arg(&bin)
        .assert()
        .failure()
        .stderr(predicate::str::contains("exit code 101"));
}

#[test]
fn test_serve_partial_keeps_failed_profile() {
    let (dir, bin) = compile_fixture("explode");
    let output = memtrace()
        .current_dir(dir.path())
        .args(["--serve-partial", "--format", "json", "--"])
        .arg(&bin)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(101));

    let doc: ProfileDocument = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc.total_events, doc.code_events.len());
    assert!(doc
        .code_events
        .iter()
        .any(|e| e.kind == EventKind::Exception && e.function.ends_with("::explode")));
}

#[test]
fn test_serves_once_and_exits() {
    let (dir, bin) = compile_fixture("fib");
    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("memtrace"))
        .current_dir(dir.path())
        .args(["--port", "0", "--once", "--"])
        .arg(&bin)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .unwrap();

    // Read stderr until the serving URL is announced
    let stderr = child.stderr.take().unwrap();
    let mut reader = std::io::BufReader::new(stderr);
    let url = loop {
        let mut line = String::new();
        let n = std::io::BufRead::read_line(&mut reader, &mut line).unwrap();
        assert!(n > 0, "memtrace exited before serving");
        if let Some(rest) = line.trim().strip_prefix("[memtrace: serving profile at ") {
            break rest.trim_end_matches(']').to_string();
        }
    };

    let doc: ProfileDocument = reqwest::blocking::get(&url).unwrap().json().unwrap();
    assert_eq!(doc.total_events, doc.code_events.len());
    assert!(child.wait().unwrap().success());
}
