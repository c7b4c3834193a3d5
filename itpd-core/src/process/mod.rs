//! Daemon process control
//!
//! [`ProcessControl`] is the only seam through which the supervisor
//! touches OS processes. [`ProcessController`] implements it with
//! `tokio::process`.

mod controller;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StartError, StopError};

pub use controller::ProcessController;

/// Opaque reference to one daemon process lifetime.
///
/// The `generation` increases on every successful start, so a handle from a
/// previous run never matches the current process even if the OS reuses the
/// pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: u32,
    pub generation: u64,
}

/// How a daemon process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if killed by one (unix)
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Start/stop/probe primitives for the daemon process
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Whether the daemon binary is present. Cheap, side-effect free.
    fn probe_installed(&self) -> bool;

    /// Launch the daemon
    async fn start(&self) -> Result<ProcessHandle, StartError>;

    /// Terminate gracefully, escalating to a forced kill after the grace
    /// period, and fail once the hard ceiling passes without a confirmed exit.
    async fn stop(&self, handle: ProcessHandle) -> Result<ExitStatus, StopError>;

    /// Non-blocking exit check. Returns the status once, when the process
    /// is first seen to have exited; the handle is released at that point.
    async fn poll_exit_status(&self, handle: ProcessHandle) -> Option<ExitStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_success_only_for_zero() {
        let ok = ExitStatus {
            code: Some(0),
            signal: None,
        };
        let failed = ExitStatus {
            code: Some(3),
            signal: None,
        };
        let killed = ExitStatus {
            code: None,
            signal: Some(9),
        };
        assert!(ok.success());
        assert!(!failed.success());
        assert!(!killed.success());
    }

    #[test]
    fn exit_status_display() {
        let killed = ExitStatus {
            code: None,
            signal: Some(15),
        };
        assert_eq!(killed.to_string(), "signal 15");
        let exited = ExitStatus {
            code: Some(1),
            signal: None,
        };
        assert_eq!(exited.to_string(), "exit code 1");
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_from_std_keeps_signal() {
        use std::os::unix::process::ExitStatusExt;

        let status = ExitStatus::from(std::process::ExitStatus::from_raw(9));
        assert_eq!(status.signal, Some(9));
        assert_eq!(status.code, None);
    }
}
