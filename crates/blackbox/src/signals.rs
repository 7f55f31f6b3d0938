//! Fatal-signal interception.
//!
//! Handlers are installed with `signal_hook_registry::register_unchecked`
//! so they run in the real signal-delivery context, on the thread that
//! received the signal. The safe `signal-hook` iterator API is unusable
//! here: it refuses the fault signals (SIGSEGV, SIGFPE, SIGILL, SIGBUS)
//! and routes the rest to a helper thread, while a fault must be handled
//! synchronously on the faulting thread.
//!
//! Everything the crash path does — formatting, allocation, file I/O,
//! invoking the registered callback — runs inside that delivery context,
//! which classically restricts safe operations. A severely corrupted
//! process can make this path fail or hang; that is an accepted tradeoff
//! favoring diagnostic richness over strict reentrancy safety.

#[cfg(unix)]
pub use unix::signal_name;
#[cfg(unix)]
pub(crate) use unix::install;
#[cfg(unix)]
pub(crate) use unix::restore_defaults;
#[cfg(unix)]
pub(crate) use unix::FATAL_SIGNALS;

#[cfg(unix)]
mod unix {
    use std::io;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    use libc::c_int;
    use signal_hook::consts::signal::SIGABRT;
    use signal_hook::consts::signal::SIGBUS;
    use signal_hook::consts::signal::SIGFPE;
    use signal_hook::consts::signal::SIGILL;
    use signal_hook::consts::signal::SIGINT;
    use signal_hook::consts::signal::SIGQUIT;
    use signal_hook::consts::signal::SIGSEGV;
    use signal_hook::consts::signal::SIGTERM;
    use signal_hook::consts::signal::SIGTRAP;

    use crate::session;

    /// The handled signal set: interrupt, terminate, abort, and the fault
    /// signals, plus the POSIX extras.
    pub(crate) const FATAL_SIGNALS: &[c_int] = &[
        SIGTERM, SIGINT, SIGABRT, SIGFPE, SIGILL, SIGSEGV, SIGBUS, SIGQUIT, SIGTRAP,
    ];

    /// Set once the first fatal signal is being handled; a second delivery
    /// while set is a recursive crash and hard-exits immediately.
    static CRASH_GUARD: AtomicBool = AtomicBool::new(false);

    /// Human-readable name for a handled signal.
    pub fn signal_name(signum: c_int) -> String {
        match signum {
            SIGTERM => "SIGTERM".to_string(),
            SIGINT => "SIGINT".to_string(),
            SIGABRT => "SIGABRT".to_string(),
            SIGFPE => "SIGFPE".to_string(),
            SIGILL => "SIGILL".to_string(),
            SIGSEGV => "SIGSEGV".to_string(),
            SIGBUS => "SIGBUS".to_string(),
            SIGQUIT => "SIGQUIT".to_string(),
            SIGTRAP => "SIGTRAP".to_string(),
            other => format!("signal {other}"),
        }
    }

    /// Register the dispatch handler for every fatal signal.
    ///
    /// Registrations are process-global and stay in place until
    /// [`restore_defaults`] resets the OS dispositions; the dispatcher
    /// itself copes with the session being gone.
    pub(crate) fn install() -> io::Result<()> {
        for &sig in FATAL_SIGNALS {
            // SAFETY: `register_unchecked` is unsafe because the action
            // runs in the signal-delivery context and because it accepts
            // the fault signals. Both are the point here; the non-reentrant
            // work the dispatcher does is the module-level documented
            // tradeoff.
            unsafe {
                signal_hook_registry::register_unchecked(sig, move |info| {
                    dispatch(info.si_signo);
                })?;
            }
        }
        Ok(())
    }

    /// Put every handled signal back to its OS-default disposition.
    pub(crate) fn restore_defaults() {
        for &sig in FATAL_SIGNALS {
            // SAFETY: resetting a disposition to SIG_DFL is always valid.
            unsafe {
                libc::signal(sig, libc::SIG_DFL);
            }
        }
    }

    /// Route a delivered signal to the active session.
    ///
    /// Runs on whichever thread received the signal. A recursive crash —
    /// a fatal signal arriving while one is already being handled, e.g.
    /// raised from inside the registered callback — exits immediately
    /// with the incoming signal's number, never re-entering the
    /// capture/persist pipeline.
    fn dispatch(signum: c_int) {
        if CRASH_GUARD.swap(true, Ordering::SeqCst) {
            // SAFETY: _exit is async-signal-safe.
            unsafe {
                libc::_exit(signum);
            }
        }

        match session::active_session() {
            Some(active) => active.handle_crash(signum),
            None => {
                // No session to report through; fall back to the default
                // disposition so the exit status reflects the signal.
                // SAFETY: resets the disposition, then re-raises.
                unsafe {
                    libc::signal(signum, libc::SIG_DFL);
                    libc::raise(signum);
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_signal_name_known_signals() {
            assert_eq!(signal_name(SIGTERM), "SIGTERM");
            assert_eq!(signal_name(SIGINT), "SIGINT");
            assert_eq!(signal_name(SIGABRT), "SIGABRT");
            assert_eq!(signal_name(SIGFPE), "SIGFPE");
            assert_eq!(signal_name(SIGILL), "SIGILL");
            assert_eq!(signal_name(SIGSEGV), "SIGSEGV");
            assert_eq!(signal_name(SIGBUS), "SIGBUS");
            assert_eq!(signal_name(SIGQUIT), "SIGQUIT");
            assert_eq!(signal_name(SIGTRAP), "SIGTRAP");
        }

        #[test]
        fn test_signal_name_unknown_falls_back_to_number() {
            assert_eq!(signal_name(99), "signal 99");
        }

        #[test]
        fn test_fatal_set_has_no_duplicates() {
            let mut seen = FATAL_SIGNALS.to_vec();
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), FATAL_SIGNALS.len());
        }
    }
}

#[cfg(not(unix))]
mod fallback {
    use std::io;

    /// Signal interception is absent off POSIX; sessions still capture
    /// output and persist a normal-exit log.
    pub(crate) fn install() -> io::Result<()> {
        Ok(())
    }

    pub(crate) fn restore_defaults() {}

    pub fn signal_name(signum: i32) -> String {
        format!("signal {signum}")
    }
}

#[cfg(not(unix))]
pub use fallback::signal_name;
#[cfg(not(unix))]
pub(crate) use fallback::install;
#[cfg(not(unix))]
pub(crate) use fallback::restore_defaults;
