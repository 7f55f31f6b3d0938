//! Console output duplication.
//!
//! Every byte the process writes to stdout or stderr is mirrored into an
//! in-memory capture buffer. Transparency is achieved at the descriptor
//! level: installation saves duplicates of fds 1 and 2, then aliases both
//! onto the write end of a single pipe, so the kernel serializes every
//! write in issuance order regardless of stream. One named drain thread
//! forwards the merged bytes to the saved console fd and the buffer
//! through a [`TeeWriter`].
//!
//! Duplication is order-preserving but best-effort, not durable: a write
//! that already reached the console may be lost from the buffer if the
//! process dies mid-write.

use std::io;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;

/// Append-only capture sink shared between the session and the drain
/// threads.
pub(crate) type CaptureBuffer = Arc<Mutex<Vec<u8>>>;

/// Forwards each write to the real console first, then to the capture
/// buffer, then flushes the console so an external viewer sees output
/// promptly.
///
/// Writes are never rejected: console failures are swallowed and the
/// bytes still reach the buffer. An empty write (end of stream) is a
/// no-op, never an error.
pub(crate) struct TeeWriter<C: Write> {
    console: C,
    capture: CaptureBuffer,
}

impl<C: Write> TeeWriter<C> {
    pub(crate) fn new(console: C, capture: CaptureBuffer) -> Self {
        Self { console, capture }
    }
}

impl<C: Write> Write for TeeWriter<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let _ = self.console.write_all(buf);
        if let Ok(mut capture) = self.capture.lock() {
            capture.extend_from_slice(buf);
        }
        let _ = self.console.flush();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush()
    }
}

#[cfg(unix)]
pub(crate) use unix::console_write;
#[cfg(unix)]
pub(crate) use unix::OutputCapture;

#[cfg(unix)]
mod unix {
    use std::fs::File;
    use std::io;
    use std::io::Read;
    use std::io::Write;
    use std::os::unix::io::FromRawFd;
    use std::os::unix::io::RawFd;
    use std::thread::JoinHandle;

    use super::CaptureBuffer;
    use super::TeeWriter;
    use crate::signals::FATAL_SIGNALS;

    const DRAIN_CHUNK: usize = 8192;

    /// Installed fd-level duplication for stdout and stderr.
    ///
    /// Both descriptors alias the write end of one pipe, so concurrent
    /// writes to either stream land in the buffer in the exact order the
    /// kernel accepted them. The cost is that while capture is installed,
    /// stderr output reaches the console on the stdout duplicate
    /// (`2>&1`-style merging); restore puts each descriptor back on its
    /// own destination.
    pub(crate) struct OutputCapture {
        saved_stdout: RawFd,
        saved_stderr: RawFd,
        reader: Option<JoinHandle<()>>,
    }

    impl OutputCapture {
        /// Redirect fds 1 and 2 through one tee pipe feeding `buffer`.
        pub(crate) fn install(buffer: CaptureBuffer) -> io::Result<Self> {
            // SAFETY: dup/pipe/dup2 on descriptors this process owns. The
            // read end and the console duplicate are immediately wrapped
            // in owning `File`s; the transient write end is closed once
            // fds 1 and 2 alias it. Every failure path unwinds the
            // redirection before returning.
            unsafe {
                let saved_stdout = libc::dup(libc::STDOUT_FILENO);
                if saved_stdout < 0 {
                    return Err(io::Error::last_os_error());
                }
                let saved_stderr = libc::dup(libc::STDERR_FILENO);
                if saved_stderr < 0 {
                    let err = io::Error::last_os_error();
                    libc::close(saved_stdout);
                    return Err(err);
                }

                let mut fds: [RawFd; 2] = [0; 2];
                if libc::pipe(fds.as_mut_ptr()) != 0 {
                    let err = io::Error::last_os_error();
                    libc::close(saved_stdout);
                    libc::close(saved_stderr);
                    return Err(err);
                }
                let (read_fd, write_fd) = (fds[0], fds[1]);

                if libc::dup2(write_fd, libc::STDOUT_FILENO) < 0
                    || libc::dup2(write_fd, libc::STDERR_FILENO) < 0
                {
                    let err = io::Error::last_os_error();
                    libc::dup2(saved_stdout, libc::STDOUT_FILENO);
                    libc::dup2(saved_stderr, libc::STDERR_FILENO);
                    libc::close(saved_stdout);
                    libc::close(saved_stderr);
                    libc::close(read_fd);
                    libc::close(write_fd);
                    return Err(err);
                }
                // fds 1 and 2 are now the only write ends; restoring both
                // later is what lets the drain thread hit EOF.
                libc::close(write_fd);

                let console_fd = libc::dup(saved_stdout);
                if console_fd < 0 {
                    let err = io::Error::last_os_error();
                    libc::dup2(saved_stdout, libc::STDOUT_FILENO);
                    libc::dup2(saved_stderr, libc::STDERR_FILENO);
                    libc::close(saved_stdout);
                    libc::close(saved_stderr);
                    libc::close(read_fd);
                    return Err(err);
                }

                let pipe = File::from_raw_fd(read_fd);
                let console = File::from_raw_fd(console_fd);

                // The mask must be in force before the drain thread
                // exists: the crash path joins it, and a handler running
                // on it would deadlock against its own join. Children
                // inherit the caller's mask, so block on this thread,
                // spawn, and restore.
                let old_mask = block_fatal_signals();
                let reader = spawn_drain("output-tee", pipe, console, buffer);
                restore_signal_mask(old_mask);

                let reader = match reader {
                    Ok(handle) => handle,
                    Err(err) => {
                        libc::dup2(saved_stdout, libc::STDOUT_FILENO);
                        libc::dup2(saved_stderr, libc::STDERR_FILENO);
                        libc::close(saved_stdout);
                        libc::close(saved_stderr);
                        return Err(err);
                    }
                };

                Ok(Self {
                    saved_stdout,
                    saved_stderr,
                    reader: Some(reader),
                })
            }
        }

        /// Put the original descriptors back and join the drain thread.
        ///
        /// Joining only returns once the drain has hit end-of-stream, so
        /// after this call the buffer holds every completed write.
        /// Idempotent.
        pub(crate) fn restore(&mut self) {
            if self.saved_stdout < 0 {
                return;
            }
            // SAFETY: dup2 atomically swaps the original descriptors back
            // in, dropping the pipe's last write ends.
            unsafe {
                libc::dup2(self.saved_stdout, libc::STDOUT_FILENO);
                libc::dup2(self.saved_stderr, libc::STDERR_FILENO);
                libc::close(self.saved_stdout);
                libc::close(self.saved_stderr);
            }
            self.saved_stdout = -1;
            self.saved_stderr = -1;
            if let Some(handle) = self.reader.take() {
                let _ = handle.join();
            }
        }
    }

    impl Drop for OutputCapture {
        fn drop(&mut self) {
            self.restore();
        }
    }

    fn spawn_drain(
        name: &str,
        mut pipe: File,
        console: File,
        buffer: CaptureBuffer,
    ) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut tee = TeeWriter::new(console, buffer);
                let mut chunk = [0u8; DRAIN_CHUNK];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            let _ = tee.write(&chunk[..n]);
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            })
    }

    /// Block every handled fatal signal on the calling thread, returning
    /// the prior mask.
    fn block_fatal_signals() -> libc::sigset_t {
        // SAFETY: builds signal sets on the stack and masks the current
        // thread only.
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            let mut old: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            for &sig in FATAL_SIGNALS {
                libc::sigaddset(&mut set, sig);
            }
            libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut old);
            old
        }
    }

    fn restore_signal_mask(old: libc::sigset_t) {
        // SAFETY: reinstates the mask recorded by `block_fatal_signals`.
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &old, std::ptr::null_mut());
        }
    }

    /// Write straight to the stdout descriptor, bypassing `std`'s stream
    /// locks. The crash handler interrupts an arbitrary thread, which may
    /// already hold the `std::io::stdout` lock; taking it again would
    /// deadlock. While capture is installed fd 1 is the tee pipe, so
    /// these bytes are duplicated like any other output.
    pub(crate) fn console_write(bytes: &[u8]) {
        let mut rest = bytes;
        while !rest.is_empty() {
            // SAFETY: fd 1 is valid for the life of the process.
            let n =
                unsafe { libc::write(libc::STDOUT_FILENO, rest.as_ptr().cast(), rest.len()) };
            if n <= 0 {
                break;
            }
            rest = &rest[n as usize..];
        }
    }
}

#[cfg(not(unix))]
mod fallback {
    use std::io;
    use std::io::Write;

    use super::CaptureBuffer;

    /// Descriptor-level interception is unavailable off POSIX; the
    /// capture buffer only ever holds what the engine itself emits.
    pub(crate) struct OutputCapture;

    impl OutputCapture {
        pub(crate) fn install(_buffer: CaptureBuffer) -> io::Result<Self> {
            Ok(Self)
        }

        pub(crate) fn restore(&mut self) {}
    }

    pub(crate) fn console_write(bytes: &[u8]) {
        let _ = io::stdout().write_all(bytes);
    }
}

#[cfg(not(unix))]
pub(crate) use fallback::console_write;
#[cfg(not(unix))]
pub(crate) use fallback::OutputCapture;
