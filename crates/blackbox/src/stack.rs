//! Call-stack snapshots for crash reports.
//!
//! POSIX only; elsewhere capture degrades to an empty trace, which
//! consumers surface as "unavailable" rather than an error. Frames render
//! as their resolved symbol where one exists and as a raw instruction
//! address otherwise — file/line resolution is out of scope.

/// Upper bound on captured frames.
pub const MAX_FRAMES: usize = 64;

#[cfg(unix)]
pub fn capture() -> String {
    use std::fmt::Write;

    let mut rendered = String::new();
    let mut depth = 0usize;

    backtrace::trace(|frame| {
        if depth >= MAX_FRAMES {
            return false;
        }

        let ip = frame.ip();
        let mut symbol_name: Option<String> = None;
        backtrace::resolve_frame(frame, |symbol| {
            if symbol_name.is_none() {
                if let Some(name) = symbol.name() {
                    symbol_name = Some(name.to_string());
                }
            }
        });

        let _ = match symbol_name {
            Some(name) => writeln!(rendered, "{depth:>3}: {name} [{ip:p}]"),
            None => writeln!(rendered, "{depth:>3}: {ip:p}"),
        };

        depth += 1;
        true
    });

    rendered
}

#[cfg(not(unix))]
pub fn capture() -> String {
    String::new()
}
