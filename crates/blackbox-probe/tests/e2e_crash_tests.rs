//! End-to-end crash-path tests
//!
//! Each test runs the probe binary in an isolated temp dir and checks
//! the process-level outcome: exit status, persisted log content, and
//! the JSON crash report delivered through the callback.

#![cfg(unix)]

mod common;

use std::time::Duration;

use common::ProbeHarness;
use predicates::prelude::*;
use serde_json::Value;

// =============================================================================
// Normal Exit
// =============================================================================

#[test]
fn test_normal_exit_persists_captured_output() {
    let harness = ProbeHarness::new();
    harness
        .command()
        .args(["emit", "--lines", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("probe line 3"));

    let log = harness.only_log();
    assert!(log.contains("blackbox: session log at"));
    assert!(log.contains("probe line 1"));
    assert!(log.contains("probe line 2"));
    assert!(log.contains("probe line 3"));
    assert!(log.contains("normal exit"));
    assert!(log.contains("executable: blackbox-probe"));
    assert!(log.contains("(HH:MM:SS:CS)"));

    // Per-stream issuance order is preserved in the log.
    let first = log.find("probe line 1").unwrap();
    let second = log.find("probe line 2").unwrap();
    assert!(first < second);

    // No crash, no stack trace section.
    assert!(!log.contains("stack trace"));
}

#[test]
fn test_stderr_output_is_captured_too() {
    let harness = ProbeHarness::new();
    // While capture is installed both streams ride one pipe, so stderr
    // output reaches the console merged onto stdout.
    harness
        .command()
        .args(["emit", "--lines", "2", "--stderr"])
        .assert()
        .success()
        .stdout(predicate::str::contains("probe line 2"));

    let log = harness.only_log();
    assert!(log.contains("probe line 1"));
    assert!(log.contains("probe line 2"));
}

// =============================================================================
// Fatal Signals
// =============================================================================

#[test]
fn test_sigterm_exit_status_is_signal_number() {
    let harness = ProbeHarness::new();
    harness
        .command()
        .args(["crash", "SIGTERM"])
        .assert()
        .code(libc::SIGTERM)
        .stdout(predicate::str::contains("fatal signal caught: SIGTERM"));

    let log = harness.only_log();
    assert!(log.contains("about to crash"));
    assert!(log.contains("crashed: SIGTERM"));
    assert!(log.contains("stack trace"));
}

#[test]
fn test_every_handled_signal_is_logged_under_its_name() {
    let signals = [
        ("SIGINT", libc::SIGINT),
        ("SIGABRT", libc::SIGABRT),
        ("SIGFPE", libc::SIGFPE),
        ("SIGILL", libc::SIGILL),
        ("SIGBUS", libc::SIGBUS),
        ("SIGQUIT", libc::SIGQUIT),
        ("SIGTRAP", libc::SIGTRAP),
    ];

    for (name, signum) in signals {
        let harness = ProbeHarness::new();
        harness
            .command()
            .args(["crash", name])
            .assert()
            .code(signum);

        let log = harness.only_log();
        assert!(
            log.contains(&format!("crashed: {name}")),
            "log for {name} lacks its exit reason"
        );
    }
}

#[test]
fn test_sigsegv_crash_is_reported_by_name() {
    let harness = ProbeHarness::new();
    harness
        .command()
        .args(["crash", "SEGV"])
        .assert()
        .code(libc::SIGSEGV);

    let log = harness.only_log();
    assert!(log.contains("crashed: SIGSEGV"));
}

// =============================================================================
// Crash Callback
// =============================================================================

#[test]
fn test_callback_receives_full_crash_record() {
    let harness = ProbeHarness::new();
    let report_path = harness.path().join("crash-report.json");

    harness
        .command()
        .args(["crash", "SIGSEGV", "--with-callback"])
        .env("BLACKBOX_PROBE_REPORT", &report_path)
        .assert()
        .code(86);

    let report: Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();

    assert_eq!(report["signal_name"], "SIGSEGV");
    assert_eq!(report["signal_number"], libc::SIGSEGV);
    assert_eq!(report["executable_name"], "blackbox-probe");
    assert!(report["stack_trace"].as_str().unwrap().contains(": "));
    assert!(
        report["log_content"]
            .as_str()
            .unwrap()
            .contains("about to crash")
    );
    assert!(report["log_path"].as_str().unwrap().ends_with(".log"));
    assert!(report["session_duration_ms"].as_u64().is_some());

    // The log was already persisted before the callback ran.
    let log = harness.only_log();
    assert!(log.contains("crashed: SIGSEGV"));
}

#[test]
fn test_callback_may_replace_the_handler_without_hanging() {
    let harness = ProbeHarness::new();
    harness
        .command()
        .args(["crash", "SIGTERM", "--reregister"])
        .timeout(Duration::from_secs(10))
        .assert()
        .code(86);

    let log = harness.only_log();
    assert!(log.contains("crashed: SIGTERM"));
}

// =============================================================================
// Recursive Crash
// =============================================================================

#[test]
fn test_recursive_crash_exits_with_second_signal_number() {
    let harness = ProbeHarness::new();
    harness
        .command()
        .args(["crash", "SIGTERM", "--then-raise", "SIGABRT"])
        .assert()
        .code(libc::SIGABRT);

    // The first pass persisted its log; the recursive delivery must not
    // have started a second one.
    let log = harness.only_log();
    assert!(log.contains("crashed: SIGTERM"));
}

// =============================================================================
// One-Shot Persistence
// =============================================================================

#[test]
fn test_second_save_is_a_noop() {
    let harness = ProbeHarness::new();
    harness
        .command()
        .arg("save-twice")
        .assert()
        .success()
        .stdout(predicate::str::contains("payload after first save"));

    let log = harness.only_log();
    assert!(log.contains("first save"));
    assert!(log.contains("payload before first save"));
    // Output after the first save is no longer captured, and the second
    // save never overwrites the file.
    assert!(!log.contains("second save"));
    assert!(!log.contains("payload after first save"));
}
