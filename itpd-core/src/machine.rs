//! Lifecycle state machine
//!
//! The single source of truth for [`DaemonState`]. It is pure and
//! synchronous: the supervisor feeds it user intents ([`begin`]) and
//! observed outcomes ([`apply`]), and it answers with the resulting
//! [`StateChange`] or refuses the edge. No I/O happens here.
//!
//! [`begin`]: LifecycleStateMachine::begin
//! [`apply`]: LifecycleStateMachine::apply

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{Failure, Rejected};
use crate::state::{DaemonState, Intent, StateChange, TransitionRequest};

/// An observed outcome fed into the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    InstallRequested,
    InstallSucceeded,
    InstallFailed(Failure),
    StartSucceeded,
    StartFailed(Failure),
    StopRequested,
    /// The process exit was confirmed after a stop request
    ExitConfirmed,
    StopFailed(Failure),
    /// The process exited while nobody asked it to
    UnsolicitedExit(Failure),
    /// Operator acknowledged an error and the re-probe found the daemon idle
    Reset,
    /// `probe_installed()` returned false
    ProbeMissing,
}

impl Trigger {
    fn name(&self) -> &'static str {
        match self {
            Self::InstallRequested => "install_requested",
            Self::InstallSucceeded => "install_succeeded",
            Self::InstallFailed(_) => "install_failed",
            Self::StartSucceeded => "start_succeeded",
            Self::StartFailed(_) => "start_failed",
            Self::StopRequested => "stop_requested",
            Self::ExitConfirmed => "exit_confirmed",
            Self::StopFailed(_) => "stop_failed",
            Self::UnsolicitedExit(_) => "unsolicited_exit",
            Self::Reset => "reset",
            Self::ProbeMissing => "probe_missing",
        }
    }

    fn into_failure(self) -> Option<Failure> {
        match self {
            Self::InstallFailed(f)
            | Self::StartFailed(f)
            | Self::StopFailed(f)
            | Self::UnsolicitedExit(f) => Some(f),
            _ => None,
        }
    }
}

/// A trigger that has no edge out of the current state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No transition from {from} on {trigger}")]
pub struct InvalidTransition {
    pub from: DaemonState,
    pub trigger: &'static str,
}

/// Whether `from -> to` is an edge of the lifecycle graph
pub fn is_valid_edge(from: DaemonState, to: DaemonState) -> bool {
    use DaemonState::*;

    if to == NotInstalled {
        return from != NotInstalled;
    }

    matches!(
        (from, to),
        (NotInstalled, Installing)
            | (Installing, InstalledIdle)
            | (Installing, Error)
            | (InstalledIdle, Running)
            | (InstalledIdle, Error)
            | (Running, Error)
            | (Running, Stopping)
            | (Stopping, InstalledIdle)
            | (Stopping, Error)
            | (Error, InstalledIdle)
    )
}

/// Target state for `trigger` applied in `state`, if the edge exists
fn target(state: DaemonState, trigger: &Trigger) -> Option<DaemonState> {
    use DaemonState::*;

    match (state, trigger) {
        (NotInstalled, Trigger::InstallRequested) => Some(Installing),
        (Installing, Trigger::InstallSucceeded) => Some(InstalledIdle),
        (Installing, Trigger::InstallFailed(_)) => Some(Error),
        (InstalledIdle, Trigger::StartSucceeded) => Some(Running),
        (InstalledIdle, Trigger::StartFailed(_)) => Some(Error),
        (Running, Trigger::StopRequested) => Some(Stopping),
        (Running, Trigger::UnsolicitedExit(_)) => Some(Error),
        (Stopping, Trigger::ExitConfirmed) => Some(InstalledIdle),
        (Stopping, Trigger::StopFailed(_)) => Some(Error),
        (Error, Trigger::Reset) => Some(InstalledIdle),
        (from, Trigger::ProbeMissing) if from != NotInstalled => Some(NotInstalled),
        _ => None,
    }
}

/// Authoritative daemon state plus the transition-in-progress guard
#[derive(Debug)]
pub struct LifecycleStateMachine {
    state: DaemonState,
    in_flight: Option<TransitionRequest>,
    last_failure: Option<Failure>,
    next_seq: u64,
}

impl LifecycleStateMachine {
    /// Create a machine from the result of the first installation probe
    pub fn new(installed: bool) -> Self {
        let state = if installed {
            DaemonState::InstalledIdle
        } else {
            DaemonState::NotInstalled
        };
        Self {
            state,
            in_flight: None,
            last_failure: None,
            next_seq: 1,
        }
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// The accepted request that has not completed yet
    pub fn in_flight(&self) -> Option<TransitionRequest> {
        self.in_flight
    }

    /// Failure that accompanied the most recent transition into `Error`
    pub fn last_failure(&self) -> Option<&Failure> {
        self.last_failure.as_ref()
    }

    /// Validate and accept a user intent.
    ///
    /// On success the request becomes the in-flight request. Install and
    /// stop move to their transitional state immediately and return that
    /// change; start has no transitional state and returns `None`.
    pub fn begin(&mut self, intent: Intent) -> Result<Option<StateChange>, Rejected> {
        if let Some(pending) = self.in_flight {
            return Err(Rejected::TransitionInProgress {
                pending: pending.intent,
            });
        }

        let trigger = match (intent, self.state) {
            (Intent::Install, DaemonState::NotInstalled) => Some(Trigger::InstallRequested),
            (Intent::Start, DaemonState::InstalledIdle | DaemonState::Error) => None,
            (Intent::Stop, DaemonState::Running) => Some(Trigger::StopRequested),
            (Intent::Start, DaemonState::Running) => return Err(Rejected::AlreadyRunning),
            (Intent::Start, DaemonState::NotInstalled) => return Err(Rejected::NotInstalled),
            (Intent::Stop, DaemonState::NotInstalled | DaemonState::InstalledIdle) => {
                return Err(Rejected::NotRunning);
            }
            (intent, state) => return Err(Rejected::NotAllowed { state, intent }),
        };

        self.in_flight = Some(TransitionRequest::new(intent));
        debug!(%intent, state = %self.state, "Lifecycle request accepted");

        match trigger {
            Some(trigger) => self.apply(trigger).map_err(|e| {
                // begin() only builds triggers that have an edge
                warn!(error = %e, "Accepted request had no edge");
                self.in_flight = None;
                Rejected::NotAllowed {
                    state: self.state,
                    intent,
                }
            }),
            None => Ok(None),
        }
    }

    /// Apply an observed outcome.
    ///
    /// Returns `Ok(None)` when the machine is already where the trigger
    /// leads (a repeated missing-probe). Outcomes that complete a request
    /// clear the in-flight guard; `ProbeMissing` clears it unconditionally.
    pub fn apply(&mut self, trigger: Trigger) -> Result<Option<StateChange>, InvalidTransition> {
        if trigger == Trigger::ProbeMissing && self.state == DaemonState::NotInstalled {
            self.in_flight = None;
            return Ok(None);
        }

        let Some(to) = target(self.state, &trigger) else {
            return Err(InvalidTransition {
                from: self.state,
                trigger: trigger.name(),
            });
        };
        debug_assert!(is_valid_edge(self.state, to));

        if completes_request(&trigger) {
            self.in_flight = None;
        }

        let from = self.state;
        let failure = trigger.into_failure();
        if failure.is_some() {
            self.last_failure = failure.clone();
        }
        self.state = to;

        debug!(%from, %to, "Daemon state changed");
        Ok(Some(self.stamp(from, to, failure)))
    }

    /// Drop the in-flight request without a state change
    pub fn abandon(&mut self) {
        if let Some(request) = self.in_flight.take() {
            debug!(intent = %request.intent, "Lifecycle request abandoned");
        }
    }

    /// A redelivery of the current state
    pub fn snapshot(&mut self) -> StateChange {
        let failure = match self.state {
            DaemonState::Error => self.last_failure.clone(),
            _ => None,
        };
        self.stamp(self.state, self.state, failure)
    }

    fn stamp(
        &mut self,
        from: DaemonState,
        to: DaemonState,
        failure: Option<Failure>,
    ) -> StateChange {
        let seq = self.next_seq;
        self.next_seq += 1;
        StateChange {
            seq,
            from,
            to,
            failure,
            at: Utc::now(),
        }
    }
}

fn completes_request(trigger: &Trigger) -> bool {
    !matches!(
        trigger,
        Trigger::InstallRequested | Trigger::StopRequested | Trigger::Reset
    )
}
