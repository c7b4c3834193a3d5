//! Presenter bridge
//!
//! Maps state notifications onto the per-state calls a daemon control
//! screen expects. Install it with
//! `supervisor.add_state_observer(Arc::new(PresenterBridge::new(view)))`.

use crate::error::Failure;
use crate::state::{DaemonState, StateChange};
use crate::supervisor::StateObserver;

/// View-side callbacks for the daemon control screen
pub trait Presenter: Send + Sync {
    /// The daemon is in `Error`; `failure` says why when known
    fn set_something_wrong(&self, failure: Option<&Failure>);

    fn set_stopped(&self);

    fn set_installing(&self);

    /// Installation just finished
    fn set_installed(&self);

    fn set_start_button_enabled(&self, enabled: bool);

    fn set_progress_indeterminate(&self, indeterminate: bool);
}

/// [`StateObserver`] that drives a [`Presenter`]
pub struct PresenterBridge<P> {
    presenter: P,
}

impl<P: Presenter> PresenterBridge<P> {
    pub fn new(presenter: P) -> Self {
        Self { presenter }
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }
}

impl<P: Presenter> StateObserver for PresenterBridge<P> {
    fn on_state_change(&self, change: &StateChange) {
        match change.to {
            DaemonState::Error => self.presenter.set_something_wrong(change.failure.as_ref()),
            DaemonState::InstalledIdle if change.from == DaemonState::Installing => {
                self.presenter.set_installed()
            }
            DaemonState::InstalledIdle => self.presenter.set_stopped(),
            DaemonState::Installing => self.presenter.set_installing(),
            DaemonState::NotInstalled | DaemonState::Running | DaemonState::Stopping => {}
        }

        let hints = change.hints();
        self.presenter
            .set_start_button_enabled(hints.start_button_enabled);
        self.presenter
            .set_progress_indeterminate(hints.progress_indeterminate);
    }
}
