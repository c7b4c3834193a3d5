//! Supervisor facade
//!
//! [`Supervisor`] is the only object an application touches. It owns the
//! lifecycle state machine, a single lifecycle worker task that performs all
//! process operations, and a dispatcher task that delivers every
//! [`StateChange`](crate::state::StateChange) to registered observers in order.
//!
//! Requests return immediately: an invalid or overlapping request is
//! rejected synchronously with [`Rejected`]; an accepted one reports its
//! outcome through observers.

mod observers;
mod worker;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DaemonConfig;
use crate::error::{ConfigError, Rejected};
use crate::install::Installer;
use crate::machine::LifecycleStateMachine;
use crate::process::{ProcessControl, ProcessController};
use crate::state::{DaemonState, Intent, TransitionRequest, UiHints};
use crate::tail::{LogSubscription, LogTailer, TailFrom};

pub use observers::{ObserverId, StateObserver};

use observers::ObserverRegistry;
use worker::{Command, Shared, Worker};

/// Handle to the daemon supervisor.
///
/// Cheap to clone; all clones drive the same supervisor. When the last
/// clone is dropped the worker stops and a running daemon is terminated.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: DaemonConfig,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    process: Arc<dyn ProcessControl>,
    has_installer: bool,
    observers: Arc<ObserverRegistry>,
    tailer: LogTailer,
    cancel: CancellationToken,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl Supervisor {
    /// Create a supervisor and spawn its tasks.
    ///
    /// The initial state comes from one installation probe. Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(
        config: DaemonConfig,
        process: Arc<dyn ProcessControl>,
        installer: Option<Arc<dyn Installer>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let installed = process.probe_installed();
        let machine = LifecycleStateMachine::new(installed);
        info!(state = %machine.state(), "Supervisor starting");

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(machine, notify_tx));
        let observers = Arc::new(ObserverRegistry::default());
        let cancel = CancellationToken::new();

        let dispatcher = tokio::spawn(observers::run_dispatcher(observers.clone(), notify_rx));
        let worker = Worker::new(
            config.clone(),
            shared.clone(),
            process.clone(),
            installer.clone(),
            command_rx,
            cancel.clone(),
        );
        let worker = tokio::spawn(worker.run());

        Ok(Self {
            inner: Arc::new(Inner {
                tailer: LogTailer::from_config(&config),
                config,
                shared,
                commands: command_tx,
                process,
                has_installer: installer.is_some(),
                observers,
                cancel,
                tasks: Mutex::new(Some((worker, dispatcher))),
            }),
        })
    }

    /// Supervisor driving the real i2pd binary described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn with_controller(
        config: DaemonConfig,
        installer: Option<Arc<dyn Installer>>,
    ) -> Result<Self, ConfigError> {
        let process = Arc::new(ProcessController::new(config.clone()));
        Self::new(config, process, installer)
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.inner.config
    }

    /// Current authoritative state
    pub fn state(&self) -> DaemonState {
        self.inner.shared.state()
    }

    pub fn hints(&self) -> UiHints {
        self.state().hints()
    }

    /// Probe the filesystem for the daemon binary
    pub fn is_installed(&self) -> bool {
        self.inner.process.probe_installed()
    }

    /// Ask for the daemon to be installed.
    ///
    /// # Errors
    ///
    /// Rejected if a request is in flight, no installer was configured, or
    /// the daemon is not in `NotInstalled`.
    pub fn request_install(&self) -> Result<(), Rejected> {
        if !self.inner.has_installer {
            return Err(Rejected::NoInstaller);
        }
        self.submit(Intent::Install, Command::Install)
    }

    /// Ask for the daemon to be started. From `Error` the supervisor first
    /// re-probes and resets to `InstalledIdle`.
    ///
    /// # Errors
    ///
    /// Rejected if a request is in flight or the daemon is running or not
    /// installed.
    pub fn request_start(&self) -> Result<(), Rejected> {
        self.submit(Intent::Start, Command::Start)
    }

    /// Ask for the running daemon to be stopped.
    ///
    /// # Errors
    ///
    /// Rejected if a request is in flight or the daemon is not running.
    pub fn request_stop(&self) -> Result<(), Rejected> {
        self.submit(Intent::Stop, Command::Stop)
    }

    fn submit(
        &self,
        intent: Intent,
        command: fn(TransitionRequest) -> Command,
    ) -> Result<(), Rejected> {
        if self.inner.cancel.is_cancelled() {
            return Err(Rejected::ShutDown);
        }

        let mut machine = self.inner.shared.lock();
        let change = machine.begin(intent)?;
        let Some(request) = machine.in_flight() else {
            return Err(Rejected::ShutDown);
        };

        if self.inner.commands.send(command(request)).is_err() {
            machine.abandon();
            return Err(Rejected::ShutDown);
        }
        if let Some(change) = change {
            self.inner.shared.publish(change);
        }
        Ok(())
    }

    /// Probe and reconcile immediately, then redeliver the current state to
    /// every observer. Returns the state after reconciliation.
    ///
    /// Waits behind an operation the worker is already performing.
    pub async fn refresh_state(&self) -> DaemonState {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.inner.commands.send(Command::Refresh(reply_tx)).is_err() {
            return self.state();
        }
        reply_rx.await.unwrap_or_else(|_| self.state())
    }

    /// Start following the daemon log from its current end
    pub fn observe_log(&self) -> LogSubscription {
        self.observe_log_from(TailFrom::End)
    }

    pub fn observe_log_from(&self, from: TailFrom) -> LogSubscription {
        self.inner
            .tailer
            .start_tailing(&self.inner.config.log_path, from)
    }

    /// Stop a log subscription and release its resources. Idempotent.
    pub async fn stop_observing_log(&self, subscription: &mut LogSubscription) {
        self.inner.tailer.stop_tailing(subscription).await;
    }

    /// Register an observer for all future notifications
    pub fn add_state_observer(&self, observer: Arc<dyn StateObserver>) -> ObserverId {
        self.inner.observers.add(observer)
    }

    /// Returns whether the observer was registered
    pub fn remove_state_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Stop polling, terminate a running daemon, deliver every pending
    /// notification and stop the dispatcher. Later calls return at once.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((worker, dispatcher)) = tasks else {
            return;
        };

        info!("Supervisor shutting down");
        if let Err(e) = worker.await {
            debug!(error = %e, "Lifecycle worker ended abnormally");
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inner.shared.close_dispatcher(ack_tx) {
            let _ = ack_rx.await;
        }
        if let Err(e) = dispatcher.await {
            debug!(error = %e, "State dispatcher ended abnormally");
        }
        info!(state = %self.state(), "Supervisor shut down");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("observers", &self.observer_count())
            .finish()
    }
}
