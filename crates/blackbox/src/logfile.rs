//! One-shot structured log rendering and persistence.
//!
//! Plain UTF-8 text with a fixed section layout: a metadata block, the
//! full captured console output, and — when a crash produced one — a
//! delimited stack-trace section. Machine consumers should prefer the
//! in-memory [`CrashInfo`](crate::CrashInfo) delivered to the crash
//! callback over parsing this file.

use std::fs;
use std::io;
use std::path::Path;

use crate::crash::format_duration_ms;

const SECTION_WIDTH: usize = 70;

/// Metadata block values for one persisted log.
pub(crate) struct LogMeta<'a> {
    pub executable: &'a str,
    pub start_time: &'a str,
    pub exit_reason: &'a str,
    pub exit_time: &'a str,
    pub duration_ms: u64,
}

fn section(label: &str) -> String {
    format!("{:-^width$}", format!(" {label} "), width = SECTION_WIDTH)
}

/// Render the complete log file contents.
pub(crate) fn render(meta: &LogMeta<'_>, captured: &str, stack_trace: &str) -> String {
    let mut out = String::new();

    out.push_str(&section("session"));
    out.push('\n');
    out.push_str(&format!("executable: {}\n", meta.executable));
    out.push_str(&format!("started:    {}\n", meta.start_time));
    out.push_str(&format!(
        "exit:       {} at {}\n",
        meta.exit_reason, meta.exit_time
    ));
    out.push_str(&format!(
        "duration:   {} (HH:MM:SS:CS)\n",
        format_duration_ms(meta.duration_ms)
    ));
    out.push('\n');

    out.push_str(&section("captured output"));
    out.push('\n');
    out.push_str(captured);
    if !captured.ends_with('\n') && !captured.is_empty() {
        out.push('\n');
    }

    if !stack_trace.is_empty() {
        out.push('\n');
        out.push_str(&section("stack trace"));
        out.push('\n');
        out.push_str(stack_trace);
        if !stack_trace.ends_with('\n') {
            out.push('\n');
        }
    }

    out
}

/// Render and write the log file.
pub(crate) fn write(
    path: &Path,
    meta: &LogMeta<'_>,
    captured: &str,
    stack_trace: &str,
) -> io::Result<()> {
    fs::write(path, render(meta, captured, stack_trace))
}
