//! Session-aware process exit and self-restart.
//!
//! Restarting means launching a fresh copy of the current executable,
//! fully detached from this process and its terminal, then shutting this
//! process down cleanly. The launch mechanism sits behind the
//! [`Relauncher`] trait so the orchestration is testable without forking.

use std::io;
use std::path::Path;
use std::process;
use std::thread;
use std::time::Duration;

use crate::session;
use crate::signals;

/// How long the restarting process lingers after a successful detached
/// launch, giving the replacement a head start before resources are
/// released.
const RESTART_SETTLE: Duration = Duration::from_millis(100);

/// Launches a detached copy of an executable.
///
/// The replacement must survive the caller's exit and must not share its
/// controlling terminal or standard streams.
pub trait Relauncher {
    fn spawn_detached(&self, exe: &Path) -> io::Result<()>;
}

/// Double-fork relauncher: the replacement is re-parented to init and
/// placed in its own session, so it outlives the caller and holds no
/// terminal.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct ForkRelauncher;

#[cfg(unix)]
impl Relauncher for ForkRelauncher {
    fn spawn_detached(&self, exe: &Path) -> io::Result<()> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let exe_c = CString::new(exe.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in executable path"))?;

        // SAFETY: classic double-fork. The middle child calls only
        // async-signal-safe functions (setsid, fork, _exit); the
        // grandchild resets its environment (cwd, std fds, inherited
        // descriptors) before execv, and execv replaces the image. The
        // parent reaps the middle child so no zombie remains.
        unsafe {
            let pid = libc::fork();
            if pid < 0 {
                return Err(io::Error::last_os_error());
            }

            if pid == 0 {
                // Middle child: detach from the parent's session, fork
                // the real replacement, and vanish so init adopts it.
                if libc::setsid() < 0 {
                    libc::_exit(1);
                }
                let grandchild = libc::fork();
                if grandchild < 0 {
                    libc::_exit(1);
                }
                if grandchild > 0 {
                    libc::_exit(0);
                }

                // Grandchild: sever every remaining tie to the caller.
                libc::chdir(b"/\0".as_ptr().cast());
                let devnull = libc::open(b"/dev/null\0".as_ptr().cast(), libc::O_RDWR);
                if devnull >= 0 {
                    libc::dup2(devnull, libc::STDIN_FILENO);
                    libc::dup2(devnull, libc::STDOUT_FILENO);
                    libc::dup2(devnull, libc::STDERR_FILENO);
                    if devnull > libc::STDERR_FILENO {
                        libc::close(devnull);
                    }
                }
                for fd in 3..1024 {
                    libc::close(fd);
                }

                let argv = [exe_c.as_ptr(), std::ptr::null()];
                libc::execv(exe_c.as_ptr(), argv.as_ptr());
                // Only reached if execv failed.
                libc::_exit(127);
            }

            // Parent: reap the middle child, which exits immediately.
            let mut status = 0;
            if libc::waitpid(pid, &mut status, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) != 0 {
                return Err(io::Error::other("detached relaunch failed"));
            }
        }

        Ok(())
    }
}

/// Portable relauncher backed by [`std::process::Command`] with null
/// standard streams. The child shares the caller's process group, so
/// detachment is weaker than [`ForkRelauncher`]'s.
#[derive(Debug, Default)]
pub struct SpawnRelauncher;

impl Relauncher for SpawnRelauncher {
    fn spawn_detached(&self, exe: &Path) -> io::Result<()> {
        process::Command::new(exe)
            .stdin(process::Stdio::null())
            .stdout(process::Stdio::null())
            .stderr(process::Stdio::null())
            .spawn()?;
        Ok(())
    }
}

#[cfg(unix)]
fn default_relauncher() -> impl Relauncher {
    ForkRelauncher
}

#[cfg(not(unix))]
fn default_relauncher() -> impl Relauncher {
    SpawnRelauncher
}

/// Launch a detached copy of the current executable.
fn relaunch(relauncher: &dyn Relauncher) -> io::Result<()> {
    let exe = std::env::current_exe()?;
    relauncher.spawn_detached(&exe)
}

/// Restart the process: launch a detached replacement, persist the
/// session log, and exit.
///
/// The exit reason records whether the relaunch actually happened; a
/// launch failure is logged and the process exits anyway. Never hangs.
pub fn restart() -> ! {
    let reason = match relaunch(&default_relauncher()) {
        Ok(()) => {
            thread::sleep(RESTART_SETTLE);
            "restart initiated"
        }
        Err(err) => {
            tracing::warn!(%err, "failed to launch replacement process");
            "relaunch failed"
        }
    };

    if let Some(active) = session::active_session() {
        active.save_log(reason);
    }

    terminate()
}

/// Tear the session down and exit with status 0.
///
/// Restores default signal dispositions first so nothing mistakes the
/// deliberate exit for a crash, persists a normal-exit log if none was
/// saved yet, and releases the console descriptors.
pub fn terminate() -> ! {
    signals::restore_defaults();

    if let Some(active) = session::active_session() {
        active.save_log("normal exit");
        active.detach_capture();
    }
    session::clear_active();

    process::exit(0)
}
