//! Shared harness for the probe integration tests.
//!
//! Every scenario runs with `TMPDIR` pointed at a per-test temporary
//! directory, so each process writes exactly the log files the test
//! expects and nothing leaks between tests.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use tempfile::TempDir;

pub struct ProbeHarness {
    tmp: TempDir,
}

impl ProbeHarness {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().expect("create temp dir"),
        }
    }

    /// Probe command with its temp dir (and thus log destination)
    /// isolated to this harness.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("blackbox-probe").expect("probe binary");
        cmd.env("TMPDIR", self.tmp.path());
        cmd
    }

    pub fn path(&self) -> &std::path::Path {
        self.tmp.path()
    }

    /// All session logs written during the test.
    pub fn log_files(&self) -> Vec<PathBuf> {
        let mut logs: Vec<PathBuf> = fs::read_dir(self.tmp.path())
            .expect("read temp dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
            .collect();
        logs.sort();
        logs
    }

    /// The single session log the scenario must have produced.
    pub fn only_log(&self) -> String {
        let logs = self.log_files();
        assert_eq!(logs.len(), 1, "expected exactly one log file, got {logs:?}");
        fs::read_to_string(&logs[0]).expect("read log file")
    }
}
