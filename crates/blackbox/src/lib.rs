//! Crash-resilient diagnostic logging.
//!
//! A [`Session`] mirrors everything the process writes to stdout and
//! stderr into an in-memory buffer, intercepts fatal signals, and — on
//! crash or clean exit — persists one structured log file per process
//! run. A registered crash callback receives the full [`CrashInfo`]
//! record in the crash context; [`restart`] relaunches the current
//! executable fully detached before exiting.
//!
//! ```no_run
//! use blackbox::Session;
//!
//! fn main() -> Result<(), blackbox::SessionError> {
//!     let session = Session::install()?;
//!     session.set_crash_callback(|info| {
//!         eprintln!("crashed with {}", info.signal_name);
//!         std::process::exit(info.signal_number);
//!     });
//!
//!     println!("doing work");
//!     Ok(())
//! }
//! ```

#![deny(clippy::all)]

pub mod crash;
pub mod error;
pub mod lifecycle;
pub mod session;
pub mod signals;
pub mod stack;

mod logfile;
mod tee;

pub use crash::format_duration_ms;
pub use crash::CrashInfo;
pub use error::SessionError;
pub use lifecycle::restart;
pub use lifecycle::terminate;
pub use lifecycle::Relauncher;
pub use lifecycle::SpawnRelauncher;
pub use session::has_active_session;
pub use session::CrashCallback;
pub use session::Session;
pub use signals::signal_name;

#[cfg(unix)]
pub use lifecycle::ForkRelauncher;
