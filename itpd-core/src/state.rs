//! Daemon state, UI hints and state-change notifications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Failure;

/// Authoritative lifecycle state of the supervised daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    /// Daemon files are not present
    NotInstalled,
    /// Installer is placing the daemon files
    Installing,
    /// Installed, no process running
    InstalledIdle,
    /// Daemon process is running
    Running,
    /// Stop requested, waiting for the process to exit
    Stopping,
    /// Something went wrong; see the accompanying [`Failure`]
    Error,
}

impl DaemonState {
    /// Every state, in declaration order
    pub const ALL: [DaemonState; 6] = [
        Self::NotInstalled,
        Self::Installing,
        Self::InstalledIdle,
        Self::Running,
        Self::Stopping,
        Self::Error,
    ];

    /// UI hints derived from this state
    pub fn hints(self) -> UiHints {
        UiHints {
            start_button_enabled: matches!(self, Self::InstalledIdle | Self::Error),
            progress_indeterminate: matches!(self, Self::Installing | Self::Stopping),
        }
    }

    /// Whether the daemon files are expected to be on disk in this state
    pub fn expects_installation(self) -> bool {
        !matches!(self, Self::NotInstalled | Self::Installing)
    }
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "not installed"),
            Self::Installing => write!(f, "installing"),
            Self::InstalledIdle => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Presentation hints derived from a [`DaemonState`].
///
/// Both values come from the same state, so a start button and a progress
/// indicator can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiHints {
    pub start_button_enabled: bool,
    pub progress_indeterminate: bool,
}

/// What a lifecycle request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Install,
    Start,
    Stop,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// A lifecycle request that has been accepted and not yet completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub intent: Intent,
    pub requested_at: DateTime<Utc>,
}

impl TransitionRequest {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            requested_at: Utc::now(),
        }
    }
}

/// A notification delivered to state observers.
///
/// `seq` increases by one per notification. A notification with
/// `from == to` is a redelivery of the current state (see
/// [`StateChange::is_redelivery`]), not a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub seq: u64,
    pub from: DaemonState,
    pub to: DaemonState,
    /// Present whenever `to` is [`DaemonState::Error`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub at: DateTime<Utc>,
}

impl StateChange {
    /// Whether this notification repeats the current state after a refresh
    pub fn is_redelivery(&self) -> bool {
        self.from == self.to
    }

    /// UI hints for the state this notification leads to
    pub fn hints(&self) -> UiHints {
        self.to.hints()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn start_button_enabled_only_when_idle_or_error() {
        let enabled: Vec<_> = DaemonState::ALL
            .into_iter()
            .filter(|s| s.hints().start_button_enabled)
            .collect();
        assert_eq!(enabled, vec![DaemonState::InstalledIdle, DaemonState::Error]);
    }

    #[test]
    fn progress_indeterminate_only_while_transitioning() {
        let busy: Vec<_> = DaemonState::ALL
            .into_iter()
            .filter(|s| s.hints().progress_indeterminate)
            .collect();
        assert_eq!(busy, vec![DaemonState::Installing, DaemonState::Stopping]);
    }

    #[test]
    fn daemon_state_serializes_snake_case() {
        let json = serde_json::to_string(&DaemonState::InstalledIdle).unwrap();
        assert_eq!(json, "\"installed_idle\"");
        let parsed: DaemonState = serde_json::from_str("\"not_installed\"").unwrap();
        assert_eq!(parsed, DaemonState::NotInstalled);
    }

    #[test]
    fn daemon_state_display() {
        assert_eq!(DaemonState::InstalledIdle.to_string(), "stopped");
        assert_eq!(DaemonState::NotInstalled.to_string(), "not installed");
        assert_eq!(DaemonState::Error.to_string(), "error");
    }

    #[test]
    fn installation_expected_once_installed() {
        assert!(!DaemonState::NotInstalled.expects_installation());
        assert!(!DaemonState::Installing.expects_installation());
        assert!(DaemonState::Running.expects_installation());
        assert!(DaemonState::Error.expects_installation());
    }

    #[test]
    fn state_change_redelivery_detection() {
        let change = StateChange {
            seq: 4,
            from: DaemonState::Running,
            to: DaemonState::Running,
            failure: None,
            at: Utc::now(),
        };
        assert!(change.is_redelivery());
        assert!(!change.hints().start_button_enabled);
    }

    #[test]
    fn state_change_omits_missing_failure_in_json() {
        let change = StateChange {
            seq: 1,
            from: DaemonState::Running,
            to: DaemonState::Stopping,
            failure: None,
            at: Utc::now(),
        };
        let json = serde_json::to_string(&change).unwrap();
        assert!(!json.contains("failure"));

        let failed = StateChange {
            seq: 2,
            from: DaemonState::Stopping,
            to: DaemonState::Error,
            failure: Some(Failure::new(FailureKind::TimedOut, "stuck")),
            at: Utc::now(),
        };
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("timed_out"));
    }
}
