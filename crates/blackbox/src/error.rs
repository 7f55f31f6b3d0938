//! Session setup errors.
//!
//! Failures on the crash-handling path itself are deliberately not
//! represented here: once a fatal signal is in flight nothing can be
//! reported back to the caller, so that path degrades silently instead
//! (see the persistence and stack-capture modules).

use std::io;

use thiserror::Error;

/// Errors raised while installing a [`Session`](crate::Session).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to install output capture: {0}")]
    CaptureInstall(io::Error),

    #[error("failed to install signal handlers: {0}")]
    SignalInstall(io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_install_display_includes_cause() {
        let err = SessionError::CaptureInstall(io::Error::other("pipe exhausted"));
        assert!(err.to_string().contains("output capture"));
        assert!(err.to_string().contains("pipe exhausted"));
    }

    #[test]
    fn test_signal_install_display_includes_cause() {
        let err = SessionError::SignalInstall(io::Error::other("EINVAL"));
        assert!(err.to_string().contains("signal handlers"));
    }
}
