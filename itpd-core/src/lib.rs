//! itpd-core: lifecycle supervisor and log tailer for a local i2pd daemon
//!
//! This crate provides:
//!
//! - **Supervisor** - [`Supervisor`], the facade that installs, starts and
//!   stops the daemon and reports every state change to observers in order
//! - **State machine** - [`LifecycleStateMachine`], the pure transition
//!   table behind [`DaemonState`]
//! - **Process control** - the [`ProcessControl`] seam and its
//!   `tokio::process` implementation [`ProcessController`]
//! - **Log tailing** - [`LogTailer`] and [`LogSubscription`], a stream of log
//!   lines that survives truncation and rotation
//! - **Install** - the [`Installer`] seam and [`BundleInstaller`]
//! - **Presenter bridge** - [`PresenterBridge`] for per-state view callbacks
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use itpd_core::{DaemonConfig, StateChange, Supervisor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let supervisor = Supervisor::with_controller(DaemonConfig::default(), None)?;
//! supervisor.add_state_observer(Arc::new(|change: &StateChange| {
//!     println!("{} -> {}", change.from, change.to);
//! }));
//!
//! supervisor.request_start()?;
//! // ...
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! request_* ──► Supervisor ──► LifecycleStateMachine (validate, guard)
//!                   │
//!                   ▼ commands
//!            lifecycle worker ──► ProcessControl / Installer
//!                   │
//!                   ▼ outcomes applied under the machine lock
//!            notification channel ──► dispatcher ──► StateObservers
//!
//! observe_log ──► LogTailer ──► one follower task per LogSubscription
//! ```

pub mod config;
pub mod error;
pub mod install;
pub mod machine;
pub mod presenter;
pub mod process;
pub mod state;
pub mod supervisor;
pub mod tail;

pub use config::DaemonConfig;
pub use error::{
    ConfigError, Failure, FailureKind, InstallError, Rejected, StartError, StopError, TailError,
};
pub use install::{BundleInstaller, Installer};
pub use machine::{LifecycleStateMachine, Trigger};
pub use presenter::{Presenter, PresenterBridge};
pub use process::{ExitStatus, ProcessControl, ProcessController, ProcessHandle};
pub use state::{DaemonState, Intent, StateChange, TransitionRequest, UiHints};
pub use supervisor::{ObserverId, StateObserver, Supervisor};
pub use tail::{
    DiscontinuityReason, LogCursor, LogEvent, LogLevel, LogLine, LogSubscription, LogTailer,
    TailFrom,
};
