//! The diagnostic session: capture buffer, identity, timing, crash
//! callback, and the process-wide singleton the signal dispatcher
//! reaches it through.
//!
//! One session per process. Construction is intended to be the first
//! action in `main`; the session then owns the duplication layer and the
//! installed signal handlers until it is dropped or
//! [`terminate`](crate::lifecycle::terminate) tears it down.

use std::path::Path;
use std::path::PathBuf;
use std::process;
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Local;

use crate::crash::CrashInfo;
use crate::error::SessionError;
use crate::logfile;
use crate::logfile::LogMeta;
use crate::signals;
use crate::stack;
use crate::tee::console_write;
use crate::tee::CaptureBuffer;
use crate::tee::OutputCapture;

/// Crash notification handler. Exactly zero or one is registered;
/// setting a new one replaces the old.
pub type CrashCallback = Arc<dyn Fn(&CrashInfo) + Send + Sync>;

/// Non-owning back-reference to the active session's shared state.
///
/// OS signal delivery invokes a context-free handler, so the dispatcher
/// needs a globally reachable route to session state. The pointer is set
/// at construction and cleared at destruction only if it still points at
/// the instance being destroyed; constructing a second session while one
/// is alive silently replaces the visible singleton without destroying
/// the first — a documented hazard, not a defended-against one.
static ACTIVE: AtomicPtr<SessionShared> = AtomicPtr::new(ptr::null_mut());

/// Whether a session is currently published as the singleton.
pub fn has_active_session() -> bool {
    !ACTIVE.load(Ordering::Acquire).is_null()
}

pub(crate) fn active_session() -> Option<&'static SessionShared> {
    // SAFETY: the pointer targets the `Arc`-owned shared state of a live
    // `Session`, which clears it before release. The design supports one
    // thread of normal execution, so a load observed non-null stays valid
    // for the duration of the crash path using it.
    unsafe { ACTIVE.load(Ordering::Acquire).as_ref() }
}

pub(crate) fn clear_active() {
    ACTIVE.store(ptr::null_mut(), Ordering::Release);
}

/// Session state shared with the signal dispatcher and the lifecycle
/// controller.
pub(crate) struct SessionShared {
    executable_name: String,
    log_path: PathBuf,
    start_time: String,
    started: Instant,
    log_saved: AtomicBool,
    buffer: CaptureBuffer,
    capture: Mutex<Option<OutputCapture>>,
    stack_trace: Mutex<String>,
    callback: Mutex<Option<CrashCallback>>,
}

impl SessionShared {
    /// Persist the session log once; later calls are no-ops.
    ///
    /// Restores the real output destinations first so the persistence
    /// pass is not itself captured, and so the buffer is complete when
    /// snapshotted. Write failures are swallowed — during crash handling
    /// there is nobody left to report them to — but logged when a
    /// subscriber is listening.
    pub(crate) fn save_log(&self, reason: &str) {
        if self.log_saved.swap(true, Ordering::SeqCst) {
            return;
        }
        self.detach_capture();

        let captured = self.captured_output();
        let trace = self.stack_trace_snapshot();
        let exit_time = log_timestamp();
        let meta = LogMeta {
            executable: &self.executable_name,
            start_time: &self.start_time,
            exit_reason: reason,
            exit_time: &exit_time,
            duration_ms: self.elapsed_ms(),
        };

        if let Err(err) = logfile::write(&self.log_path, &meta, &captured, &trace) {
            tracing::warn!(%err, path = %self.log_path.display(), "failed to persist session log");
        }
    }

    /// Restore the original output descriptors and drain the tee.
    /// Idempotent.
    pub(crate) fn detach_capture(&self) {
        if let Ok(mut guard) = self.capture.lock() {
            if let Some(mut capture) = guard.take() {
                capture.restore();
            }
        }
    }

    /// Crash path, invoked by the signal dispatcher in the delivery
    /// context of `signum`.
    pub(crate) fn handle_crash(&self, signum: i32) {
        let name = signals::signal_name(signum);
        let timestamp = log_timestamp();

        // Still intercepted at this point, so the banner and trace land
        // in the capture buffer too.
        console_write(format!("\n!!! fatal signal caught: {name} !!!\n").as_bytes());

        let trace = stack::capture();
        if !trace.is_empty() {
            console_write(format!("\nstack trace:\n{trace}").as_bytes());
            if let Ok(mut slot) = self.stack_trace.lock() {
                *slot = trace;
            }
        }

        self.save_log(&format!("crashed: {name}"));

        // Snapshot the handler and release the registration lock before
        // invoking it, so a callback may itself call `set_crash_callback`
        // without deadlocking.
        let callback = match self.callback.lock() {
            Ok(guard) => guard.as_ref().map(Arc::clone),
            Err(_) => None,
        };

        if let Some(callback) = callback {
            let info = CrashInfo {
                signal_name: name,
                signal_number: signum,
                stack_trace: self.stack_trace_snapshot(),
                timestamp,
                log_path: self.log_path.clone(),
                log_content: self.captured_output(),
                executable_name: self.executable_name.clone(),
                start_time: self.start_time.clone(),
                session_duration_ms: self.elapsed_ms(),
            };
            callback(&info);
            // The callback owns termination from here.
            return;
        }

        process::exit(signum);
    }

    fn captured_output(&self) -> String {
        match self.buffer.lock() {
            Ok(buffer) => String::from_utf8_lossy(&buffer).into_owned(),
            Err(_) => String::new(),
        }
    }

    fn stack_trace_snapshot(&self) -> String {
        match self.stack_trace.lock() {
            Ok(trace) => trace.clone(),
            Err(_) => String::new(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Handle to the process's diagnostic session.
///
/// Dropping it persists a `"normal exit"` log (if none was saved yet),
/// restores the original output destinations, and clears the singleton.
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Construct the session and publish it as the process singleton.
    ///
    /// Resolves the executable name from the process image, fixes the log
    /// path for the life of the process, installs the duplication layer
    /// on stdout/stderr and the fatal-signal handlers, and announces the
    /// log path (the announcement is itself captured).
    pub fn install() -> Result<Self, SessionError> {
        let executable_name = resolve_executable_name();
        let log_path = std::env::temp_dir().join(format!(
            "{executable_name}_{stamp}.log",
            stamp = file_timestamp()
        ));

        let buffer: CaptureBuffer = Arc::new(Mutex::new(Vec::new()));
        let capture =
            OutputCapture::install(Arc::clone(&buffer)).map_err(SessionError::CaptureInstall)?;

        let shared = Arc::new(SessionShared {
            executable_name,
            log_path,
            start_time: log_timestamp(),
            started: Instant::now(),
            log_saved: AtomicBool::new(false),
            buffer,
            capture: Mutex::new(Some(capture)),
            stack_trace: Mutex::new(String::new()),
            callback: Mutex::new(None),
        });

        let me = Arc::as_ptr(&shared) as *mut SessionShared;
        ACTIVE.store(me, Ordering::Release);

        if let Err(err) = signals::install() {
            let _ = ACTIVE.compare_exchange(
                me,
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            return Err(SessionError::SignalInstall(err));
        }

        println!("blackbox: session log at {}", shared.log_path.display());

        Ok(Self { shared })
    }

    /// Register the crash callback, replacing any prior one.
    ///
    /// With no callback registered, a fatal signal exits the process
    /// immediately with the signal number as exit status.
    pub fn set_crash_callback<F>(&self, callback: F)
    where
        F: Fn(&CrashInfo) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.shared.callback.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Persist the session log with the given exit reason. One-shot: the
    /// second and later calls are no-ops.
    pub fn save_log(&self, reason: &str) {
        self.shared.save_log(reason);
    }

    pub fn executable_name(&self) -> &str {
        &self.shared.executable_name
    }

    pub fn log_path(&self) -> &Path {
        &self.shared.log_path
    }

    pub fn start_time(&self) -> &str {
        &self.shared.start_time
    }

    /// Last captured stack trace; empty until a crash occurs.
    pub fn stack_trace(&self) -> String {
        self.shared.stack_trace_snapshot()
    }

    /// Snapshot of the captured console output so far.
    pub fn captured_output(&self) -> String {
        self.shared.captured_output()
    }

    /// Whether this instance is the one the singleton currently points
    /// at.
    pub fn is_active(&self) -> bool {
        ACTIVE.load(Ordering::Acquire) == Arc::as_ptr(&self.shared) as *mut SessionShared
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.save_log("normal exit");
        self.shared.detach_capture();

        let me = Arc::as_ptr(&self.shared) as *mut SessionShared;
        let _ = ACTIVE.compare_exchange(me, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire);
    }
}

fn resolve_executable_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "app".to_string())
}

/// Filesystem-safe timestamp embedded in the log filename; its
/// uniqueness per process start is what rules out overwrite collisions.
fn file_timestamp() -> String {
    Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Human-readable timestamp used inside log files and crash records.
pub(crate) fn log_timestamp() -> String {
    Local::now().format("%Y/%m/%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_timestamp_is_filesystem_safe() {
        let stamp = file_timestamp();
        assert!(!stamp.contains('/'));
        assert!(!stamp.contains(':'));
        assert!(!stamp.contains(' '));
    }

    #[test]
    fn test_log_timestamp_format_shape() {
        let stamp = log_timestamp();
        // YYYY/MM/DD HH:MM:SS
        assert_eq!(stamp.len(), 19);
        assert_eq!(&stamp[4..5], "/");
        assert_eq!(&stamp[10..11], " ");
        assert_eq!(&stamp[13..14], ":");
    }

    #[test]
    fn test_resolve_executable_name_nonempty() {
        let name = resolve_executable_name();
        assert!(!name.is_empty());
    }

    #[test]
    fn test_no_session_active_by_default() {
        // Unit tests never install a session; the singleton must be
        // clear so the dispatcher falls back to default dispositions.
        assert_eq!(active_session().is_some(), has_active_session());
        assert!(!has_active_session());
    }
}
