//! Lifecycle worker task
//!
//! One worker per supervisor. It is the only code that calls into
//! [`ProcessControl`] with side effects and the only code that applies
//! outcome triggers, so process operations never overlap.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::observers::Dispatch;
use crate::config::DaemonConfig;
use crate::error::{Failure, FailureKind, StopError};
use crate::install::Installer;
use crate::machine::{LifecycleStateMachine, Trigger};
use crate::process::{ProcessControl, ProcessHandle};
use crate::state::{DaemonState, StateChange, TransitionRequest};

/// State shared between the facade and the worker
pub(crate) struct Shared {
    machine: Mutex<LifecycleStateMachine>,
    notify: mpsc::UnboundedSender<Dispatch>,
}

impl Shared {
    pub(crate) fn new(
        machine: LifecycleStateMachine,
        notify: mpsc::UnboundedSender<Dispatch>,
    ) -> Self {
        Self {
            machine: Mutex::new(machine),
            notify,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, LifecycleStateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> DaemonState {
        self.lock().state()
    }

    /// Queue a notification. Callers hold the machine lock so queue order
    /// matches transition order.
    pub(crate) fn publish(&self, change: StateChange) {
        if self.notify.send(Dispatch::Change(change)).is_err() {
            debug!("State dispatcher gone, notification dropped");
        }
    }

    pub(crate) fn close_dispatcher(&self, ack: oneshot::Sender<()>) -> bool {
        self.notify.send(Dispatch::Close(ack)).is_ok()
    }

    /// Apply a trigger and publish the change under the same lock
    fn apply(&self, trigger: Trigger) -> Option<DaemonState> {
        let mut machine = self.lock();
        match machine.apply(trigger) {
            Ok(Some(change)) => {
                let to = change.to;
                self.publish(change);
                Some(to)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Refusing invalid lifecycle transition");
                None
            }
        }
    }

    /// Whether `request` is still the accepted in-flight request
    fn is_current(&self, request: &TransitionRequest) -> bool {
        self.lock().in_flight().as_ref() == Some(request)
    }

    /// Clear `request` if it is still in flight
    fn complete(&self, request: &TransitionRequest) {
        let mut machine = self.lock();
        if machine.in_flight().as_ref() == Some(request) {
            machine.abandon();
        }
    }
}

/// Work sent from the facade to the worker
pub(crate) enum Command {
    Install(TransitionRequest),
    Start(TransitionRequest),
    Stop(TransitionRequest),
    Refresh(oneshot::Sender<DaemonState>),
}

pub(crate) struct Worker {
    config: DaemonConfig,
    shared: Arc<Shared>,
    process: Arc<dyn ProcessControl>,
    installer: Option<Arc<dyn Installer>>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    running: Option<ProcessHandle>,
}

impl Worker {
    pub(crate) fn new(
        config: DaemonConfig,
        shared: Arc<Shared>,
        process: Arc<dyn ProcessControl>,
        installer: Option<Arc<dyn Installer>>,
        commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            shared,
            process,
            installer,
            commands,
            cancel,
            running: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(poll_interval = ?self.config.poll_interval, "Lifecycle worker started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    // Every facade handle is gone
                    None => break,
                },
                _ = ticker.tick() => self.poll().await,
            }
        }

        self.wind_down().await;
        debug!("Lifecycle worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Install(request) => {
                if self.shared.is_current(&request) {
                    self.install().await;
                }
                self.shared.complete(&request);
            }
            Command::Start(request) => {
                if self.shared.is_current(&request) {
                    self.start().await;
                }
                self.shared.complete(&request);
            }
            Command::Stop(request) => {
                if self.shared.is_current(&request) {
                    self.stop().await;
                }
                self.shared.complete(&request);
            }
            Command::Refresh(reply) => {
                let state = self.refresh().await;
                let _ = reply.send(state);
            }
        }
    }

    async fn install(&mut self) {
        if self.shared.state() != DaemonState::Installing {
            return;
        }

        let trigger = match &self.installer {
            None => Trigger::InstallFailed(Failure::new(
                FailureKind::InstallFailed,
                "no installer configured",
            )),
            Some(installer) => match installer.install(&self.config).await {
                Ok(()) if self.process.probe_installed() => Trigger::InstallSucceeded,
                Ok(()) => Trigger::InstallFailed(Failure::new(
                    FailureKind::InstallFailed,
                    format!(
                        "daemon binary not found at {} after install",
                        self.config.binary_path.display()
                    ),
                )),
                Err(e) => {
                    warn!(error = %e, "Install failed");
                    Trigger::InstallFailed(Failure::from(&e))
                }
            },
        };
        self.shared.apply(trigger);
    }

    async fn start(&mut self) {
        let state = self.shared.state();
        if !matches!(state, DaemonState::InstalledIdle | DaemonState::Error) {
            return;
        }

        if !self.process.probe_installed() {
            warn!("Daemon binary missing, cannot start");
            self.shared.apply(Trigger::ProbeMissing);
            return;
        }

        if state == DaemonState::Error && !self.reset().await {
            return;
        }

        match self.process.start().await {
            Ok(handle) => {
                self.running = Some(handle);
                self.shared.apply(Trigger::StartSucceeded);
            }
            Err(e) => {
                warn!(error = %e, "Start failed");
                self.shared.apply(Trigger::StartFailed(Failure::from(&e)));
            }
        }
    }

    async fn stop(&mut self) {
        if self.shared.state() != DaemonState::Stopping {
            return;
        }

        let Some(handle) = self.running else {
            warn!("Stop requested but no daemon process is held");
            self.shared.apply(Trigger::ExitConfirmed);
            return;
        };

        match self.process.stop(handle).await {
            Ok(status) => {
                self.running = None;
                info!(%status, "Daemon stopped on request");
                self.shared.apply(Trigger::ExitConfirmed);
            }
            Err(StopError::NotRunning) => {
                self.running = None;
                warn!("Daemon already gone when stop was requested");
                self.shared.apply(Trigger::ExitConfirmed);
            }
            Err(e) => {
                warn!(error = %e, "Stop failed");
                self.shared.apply(Trigger::StopFailed(Failure::from(&e)));
            }
        }
    }

    /// Leave `Error` for `InstalledIdle` once nothing is running.
    ///
    /// A process left behind by a failed stop gets one more stop attempt.
    async fn reset(&mut self) -> bool {
        if let Some(handle) = self.running {
            if self.process.poll_exit_status(handle).await.is_some() {
                self.running = None;
            } else {
                match self.process.stop(handle).await {
                    Ok(_) | Err(StopError::NotRunning) => self.running = None,
                    Err(e) => {
                        warn!(error = %e, "Leftover daemon still refuses to exit");
                        // Clear the request before observers hear the outcome
                        let mut machine = self.shared.lock();
                        machine.abandon();
                        let snapshot = machine.snapshot();
                        self.shared.publish(snapshot);
                        return false;
                    }
                }
            }
        }

        self.shared.apply(Trigger::Reset) == Some(DaemonState::InstalledIdle)
    }

    /// Exit check and installation reconciliation, run on every tick
    async fn poll(&mut self) {
        if let Some(handle) = self.running
            && let Some(status) = self.process.poll_exit_status(handle).await
        {
            self.running = None;
            match self.shared.state() {
                DaemonState::Running => {
                    warn!(%status, "Daemon exited unexpectedly");
                    self.shared.apply(Trigger::UnsolicitedExit(Failure::new(
                        FailureKind::Crashed,
                        format!("i2pd exited unexpectedly ({})", status),
                    )));
                }
                DaemonState::Stopping => {
                    self.shared.apply(Trigger::ExitConfirmed);
                }
                state => debug!(%status, %state, "Reaped daemon process"),
            }
        }

        self.reconcile_installation().await;
    }

    async fn reconcile_installation(&mut self) {
        let state = self.shared.state();
        let installed = self.process.probe_installed();

        if state.expects_installation() && !installed {
            warn!(%state, "Daemon binary disappeared");
            self.shared.apply(Trigger::ProbeMissing);
            if let Some(handle) = self.running.take()
                && let Err(e) = self.process.stop(handle).await
            {
                warn!(error = %e, "Failed to stop daemon after binary disappeared");
                // Still held by the controller; a later reset retries the stop
                if !matches!(e, StopError::NotRunning) {
                    self.running = Some(handle);
                }
            }
        } else if state == DaemonState::NotInstalled && installed {
            let mut machine = self.shared.lock();
            if machine.in_flight().is_none() {
                info!("Daemon binary appeared, treating as installed");
                for trigger in [Trigger::InstallRequested, Trigger::InstallSucceeded] {
                    if let Ok(Some(change)) = machine.apply(trigger) {
                        self.shared.publish(change);
                    }
                }
            }
        }
    }

    /// Probe and reconcile now, clear a stale error, then redeliver the
    /// current state
    async fn refresh(&mut self) -> DaemonState {
        self.poll().await;

        let (state, in_flight) = {
            let machine = self.shared.lock();
            (machine.state(), machine.in_flight())
        };
        if state == DaemonState::Error && in_flight.is_none() && self.running.is_none() {
            self.shared.apply(Trigger::Reset);
        }

        let mut machine = self.shared.lock();
        let snapshot = machine.snapshot();
        let state = snapshot.to;
        self.shared.publish(snapshot);
        state
    }

    /// Force-stop a running daemon before the worker exits
    async fn wind_down(&mut self) {
        {
            let mut machine = self.shared.lock();
            machine.abandon();
            if machine.state() == DaemonState::Running
                && let Ok(Some(change)) = machine.apply(Trigger::StopRequested)
            {
                self.shared.publish(change);
            }
        }

        let Some(handle) = self.running.take() else {
            return;
        };

        info!(pid = handle.pid, "Stopping daemon for shutdown");
        let trigger = match self.process.stop(handle).await {
            Ok(_) | Err(StopError::NotRunning) => Trigger::ExitConfirmed,
            Err(e) => {
                warn!(error = %e, "Failed to stop daemon during shutdown");
                Trigger::StopFailed(Failure::from(&e))
            }
        };
        if self.shared.state() == DaemonState::Stopping {
            self.shared.apply(trigger);
        }
    }
}
