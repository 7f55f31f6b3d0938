//! The structured crash record handed to a registered callback.

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// Snapshot of process state captured at the moment a fatal signal is
/// handled.
///
/// Produced once per crash and passed by reference to the registered
/// callback; the engine does not retain it. A callback may render UI,
/// forward telemetry, or re-log the record, but it is responsible for
/// eventually terminating the process — the engine takes no further
/// action after invoking it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashInfo {
    /// Human-readable signal name, e.g. `"SIGSEGV"`.
    pub signal_name: String,
    /// Raw signal number.
    pub signal_number: i32,
    /// Rendered stack trace, empty when capture is unavailable.
    pub stack_trace: String,
    /// Crash timestamp in log format (`YYYY/MM/DD HH:MM:SS`).
    pub timestamp: String,
    /// Path of the persisted session log.
    pub log_path: PathBuf,
    /// Full captured console output up to the crash.
    pub log_content: String,
    /// Name of the running executable.
    pub executable_name: String,
    /// Session start timestamp in log format.
    pub start_time: String,
    /// Elapsed session time at the crash instant, in milliseconds.
    pub session_duration_ms: u64,
}

impl CrashInfo {
    /// Session duration rendered as `HH:MM:SS:CS` (CS = centiseconds).
    pub fn formatted_duration(&self) -> String {
        format_duration_ms(self.session_duration_ms)
    }
}

/// Format a millisecond duration as `HH:MM:SS:CS`.
pub fn format_duration_ms(ms: u64) -> String {
    let hours = ms / (1000 * 60 * 60);
    let minutes = (ms / (1000 * 60)) % 60;
    let seconds = (ms / 1000) % 60;
    let centiseconds = (ms / 10) % 100;
    format!("{hours:02}:{minutes:02}:{seconds:02}:{centiseconds:02}")
}
