//! Error types for itpd-core

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{DaemonState, Intent};

/// Errors from launching the daemon process
#[derive(Error, Debug)]
pub enum StartError {
    #[error("Daemon is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Failed to launch daemon: {0}")]
    LaunchFailed(#[source] std::io::Error),

    #[error("Daemon binary not found at {}", .0.display())]
    BinaryMissing(PathBuf),
}

impl StartError {
    /// Failure classification for observers
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::AlreadyRunning { .. } => FailureKind::AlreadyRunning,
            Self::LaunchFailed(_) => FailureKind::LaunchFailed,
            Self::BinaryMissing(_) => FailureKind::BinaryMissing,
        }
    }
}

/// Errors from stopping the daemon process
#[derive(Error, Debug)]
pub enum StopError {
    #[error("Daemon is not running")]
    NotRunning,

    #[error("Daemon did not exit within {0:?}")]
    TimedOut(Duration),

    #[error("Failed to confirm daemon exit: {0}")]
    Wait(#[source] std::io::Error),
}

impl StopError {
    /// Failure classification for observers
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotRunning => FailureKind::NotRunning,
            Self::TimedOut(_) | Self::Wait(_) => FailureKind::TimedOut,
        }
    }
}

/// Errors that end a log subscription
#[derive(Error, Debug)]
pub enum TailError {
    #[error("Log source lost: {}", .0.display())]
    SourceLost(PathBuf),

    #[error("Failed to read log {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from placing the daemon files
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Install bundle not found at {}", .0.display())]
    BundleMissing(PathBuf),

    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set permissions on {}: {source}", path.display())]
    SetPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Installed binary not found at {} after install", .0.display())]
    Verification(PathBuf),

    #[error("Install failed: {0}")]
    Other(String),
}

/// Invalid daemon configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("grace_period ({grace:?}) must be shorter than stop_timeout ({timeout:?})")]
    GraceExceedsTimeout { grace: Duration, timeout: Duration },

    #[error("binary_path must not be empty")]
    EmptyBinaryPath,
}

/// Synchronous rejection of a lifecycle request.
///
/// A rejected request never changes the daemon state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    #[error("A {pending} request is still in progress")]
    TransitionInProgress { pending: Intent },

    #[error("Daemon is already running")]
    AlreadyRunning,

    #[error("Daemon is not running")]
    NotRunning,

    #[error("Daemon is not installed")]
    NotInstalled,

    #[error("Cannot {intent} while {state}")]
    NotAllowed { state: DaemonState, intent: Intent },

    #[error("No installer configured")]
    NoInstaller,

    #[error("Supervisor has shut down")]
    ShutDown,
}

/// Classification of a failure reported alongside the `Error` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BinaryMissing,
    AlreadyRunning,
    NotRunning,
    LaunchFailed,
    TimedOut,
    TransitionInProgress,
    SourceLost,
    InstallFailed,
    /// The daemon exited without a stop request
    Crashed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::BinaryMissing => "binary_missing",
            Self::AlreadyRunning => "already_running",
            Self::NotRunning => "not_running",
            Self::LaunchFailed => "launch_failed",
            Self::TimedOut => "timed_out",
            Self::TransitionInProgress => "transition_in_progress",
            Self::SourceLost => "source_lost",
            Self::InstallFailed => "install_failed",
            Self::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// Structured error payload delivered with a transition into `Error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Failure {
    /// Create a failure stamped with the current time
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

impl From<&StartError> for Failure {
    fn from(err: &StartError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<&StopError> for Failure {
    fn from(err: &StopError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<&InstallError> for Failure {
    fn from(err: &InstallError) -> Self {
        Self::new(FailureKind::InstallFailed, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_error_binary_missing_displays_path() {
        let error = StartError::BinaryMissing(PathBuf::from("/opt/i2pd/i2pd"));
        assert!(error.to_string().contains("/opt/i2pd/i2pd"));
        assert_eq!(error.kind(), FailureKind::BinaryMissing);
    }

    #[test]
    fn start_error_launch_failed_keeps_source() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = StartError::LaunchFailed(io_error);
        assert!(error.to_string().contains("Failed to launch daemon"));
        assert!(std::error::Error::source(&error).is_some());
        assert_eq!(error.kind(), FailureKind::LaunchFailed);
    }

    #[test]
    fn stop_error_wait_classifies_as_timed_out() {
        let error = StopError::Wait(std::io::Error::other("wait failed"));
        assert_eq!(error.kind(), FailureKind::TimedOut);
        assert_eq!(
            StopError::TimedOut(Duration::from_secs(3)).kind(),
            FailureKind::TimedOut
        );
        assert_eq!(StopError::NotRunning.kind(), FailureKind::NotRunning);
    }

    #[test]
    fn rejected_in_progress_names_pending_intent() {
        let rejected = Rejected::TransitionInProgress {
            pending: Intent::Stop,
        };
        assert!(rejected.to_string().contains("stop"));
    }

    #[test]
    fn rejected_not_allowed_names_state_and_intent() {
        let rejected = Rejected::NotAllowed {
            state: DaemonState::Error,
            intent: Intent::Install,
        };
        let text = rejected.to_string();
        assert!(text.contains("install"));
        assert!(text.contains("error"));
    }

    #[test]
    fn failure_from_install_error_is_install_failed() {
        let error = InstallError::BundleMissing(PathBuf::from("/nope"));
        let failure = Failure::from(&error);
        assert_eq!(failure.kind, FailureKind::InstallFailed);
        assert!(failure.message.contains("/nope"));
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::TransitionInProgress).unwrap();
        assert_eq!(json, "\"transition_in_progress\"");
        assert_eq!(FailureKind::SourceLost.to_string(), "source_lost");
    }
}
