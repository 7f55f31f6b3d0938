//! End-to-end lifecycle tests
//!
//! Deliberate termination, detached self-restart, and singleton
//! replacement, observed from outside the probe process.

#![cfg(unix)]

mod common;

use std::thread;
use std::time::Duration;
use std::time::Instant;

use common::ProbeHarness;
use predicates::prelude::*;

// =============================================================================
// Deliberate Termination
// =============================================================================

#[test]
fn test_terminate_exits_zero_and_persists_log() {
    let harness = ProbeHarness::new();
    harness
        .command()
        .arg("terminate")
        .assert()
        .success()
        .stdout(predicate::str::contains("terminating deliberately"));

    let log = harness.only_log();
    assert!(log.contains("terminating deliberately"));
    assert!(log.contains("normal exit"));
}

// =============================================================================
// Detached Self-Restart
// =============================================================================

#[test]
fn test_restart_launches_detached_replacement() {
    let harness = ProbeHarness::new();
    let mark = harness.path().join("restart.mark");

    harness
        .command()
        .arg("restart")
        .env("BLACKBOX_PROBE_MARK", &mark)
        .assert()
        .success();

    // The replacement is detached; give it a moment to come up and
    // write its mark.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !mark.exists() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert!(mark.exists(), "replacement process never wrote its mark");

    let pid: u32 = std::fs::read_to_string(&mark)
        .unwrap()
        .trim()
        .parse()
        .expect("mark file holds the replacement pid");
    assert!(pid > 0);

    // Only the restarting process carried a session; the replacement
    // exited before installing one.
    let log = harness.only_log();
    assert!(log.contains("requesting restart"));
    assert!(log.contains("restart initiated"));
}

// =============================================================================
// Singleton Replacement
// =============================================================================

#[test]
fn test_second_session_takes_over_singleton() {
    let harness = ProbeHarness::new();
    harness
        .command()
        .arg("two-sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("first active: false"))
        .stdout(predicate::str::contains("second active: true"))
        .stdout(predicate::str::contains("paths differ: true"));

    // One log per session, at distinct timestamped paths.
    assert_eq!(harness.log_files().len(), 2);
}
