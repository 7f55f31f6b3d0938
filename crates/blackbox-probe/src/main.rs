//! blackbox-probe - scenario harness for the diagnostic engine
//!
//! Each subcommand drives one engine behavior to a process-level outcome
//! (exit status, log file, crash report) that the integration tests can
//! observe from outside. Running with no subcommand while
//! `BLACKBOX_PROBE_MARK` is set writes the process id to that path and
//! exits; a detached relaunch runs the bare executable, so the mark file
//! is the proof that a replacement actually came up.

use std::sync::OnceLock;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;

use blackbox::Session;

#[derive(Parser)]
#[command(name = "blackbox-probe", version, about = "Diagnostic engine scenario harness")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Emit numbered lines under capture, then exit cleanly.
    Emit {
        /// Number of lines to emit.
        #[arg(long, default_value_t = 3)]
        lines: usize,
        /// Emit on stderr instead of stdout.
        #[arg(long)]
        stderr: bool,
    },
    /// Raise a fatal signal against this process.
    Crash {
        /// Signal to raise, e.g. SIGSEGV or TERM.
        signal: String,
        /// Register a callback that writes the crash report as JSON to
        /// $BLACKBOX_PROBE_REPORT and exits 86.
        #[arg(long)]
        with_callback: bool,
        /// Register a callback that raises this second signal, forcing
        /// the recursive-crash path.
        #[arg(long)]
        then_raise: Option<String>,
        /// Register a callback that replaces the registered handler from
        /// inside crash handling, then exits 86.
        #[arg(long)]
        reregister: bool,
    },
    /// Persist the log explicitly, then try to persist it again.
    SaveTwice,
    /// Request a detached self-restart.
    Restart,
    /// Shut the session down deliberately.
    Terminate,
    /// Install a second session while the first is alive and report
    /// which one the singleton tracks.
    TwoSessions,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.command.is_none() {
        if let Ok(mark) = std::env::var("BLACKBOX_PROBE_MARK") {
            let _ = std::fs::write(&mark, std::process::id().to_string());
            return;
        }
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let command = match cli.command {
        Some(command) => command,
        None => {
            println!("no scenario requested");
            return Ok(());
        }
    };

    match command {
        Command::Emit { lines, stderr } => {
            let session = Session::install()?;
            for i in 1..=lines {
                if stderr {
                    eprintln!("probe line {i}");
                } else {
                    println!("probe line {i}");
                }
            }
            drop(session);
        }

        Command::Crash {
            signal,
            with_callback,
            then_raise,
            reregister,
        } => {
            // Parked in a static so a callback can reach the session
            // from crash context.
            static SESSION: OnceLock<Session> = OnceLock::new();
            let _ = SESSION.set(Session::install()?);
            let session = SESSION.get().ok_or("session slot not set")?;

            if with_callback {
                let report = std::env::var("BLACKBOX_PROBE_REPORT").ok();
                session.set_crash_callback(move |info| {
                    if let Some(path) = &report {
                        if let Ok(json) = serde_json::to_string_pretty(info) {
                            let _ = std::fs::write(path, json);
                        }
                    }
                    std::process::exit(86);
                });
            }

            if reregister {
                session.set_crash_callback(|_info| {
                    if let Some(active) = SESSION.get() {
                        active.set_crash_callback(|_info| {});
                    }
                    std::process::exit(86);
                });
            }

            if let Some(second) = then_raise {
                let second = parse_signal(&second)?;
                session.set_crash_callback(move |_info| {
                    // Re-entering the engine from inside crash handling
                    // must hard-exit with the second signal's number, so
                    // this exit is never reached.
                    raise(second);
                    std::process::exit(1);
                });
            }

            println!("about to crash");
            raise(parse_signal(&signal)?);
            // Only reached if the handler returned without exiting.
            std::process::exit(2);
        }

        Command::SaveTwice => {
            let session = Session::install()?;
            println!("payload before first save");
            session.save_log("first save");
            println!("payload after first save");
            session.save_log("second save");
        }

        Command::Restart => {
            let _session = Session::install()?;
            println!("requesting restart");
            blackbox::restart();
        }

        Command::Terminate => {
            let _session = Session::install()?;
            println!("terminating deliberately");
            blackbox::terminate();
        }

        Command::TwoSessions => {
            let first = Session::install()?;
            let first_path = first.log_path().to_path_buf();

            // Log filenames carry second-resolution timestamps; wait one
            // out so the second session gets a distinct path.
            std::thread::sleep(Duration::from_millis(1100));

            let second = Session::install()?;
            println!("first active: {}", first.is_active());
            println!("second active: {}", second.is_active());
            println!("paths differ: {}", first_path != second.log_path());
        }
    }

    Ok(())
}

#[cfg(unix)]
fn raise(signum: i32) {
    // SAFETY: raise delivers the signal to the calling thread.
    unsafe {
        libc::raise(signum);
    }
}

#[cfg(not(unix))]
fn raise(_signum: i32) {}

#[cfg(unix)]
fn parse_signal(name: &str) -> Result<i32, String> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };

    match full.as_str() {
        "SIGTERM" => Ok(libc::SIGTERM),
        "SIGINT" => Ok(libc::SIGINT),
        "SIGABRT" => Ok(libc::SIGABRT),
        "SIGFPE" => Ok(libc::SIGFPE),
        "SIGILL" => Ok(libc::SIGILL),
        "SIGSEGV" => Ok(libc::SIGSEGV),
        "SIGBUS" => Ok(libc::SIGBUS),
        "SIGQUIT" => Ok(libc::SIGQUIT),
        "SIGTRAP" => Ok(libc::SIGTRAP),
        other => Err(format!("unsupported signal: {other}")),
    }
}

#[cfg(not(unix))]
fn parse_signal(name: &str) -> Result<i32, String> {
    Err(format!("signals unsupported on this platform: {name}"))
}
