//! Run the daemon in the foreground

use std::path::Path;

use anyhow::{Result, anyhow};
use clap::Args;
use itpd_core::{DaemonState, LogEvent, LogSubscription, StateChange, Supervisor, TailError};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use super::state_changes;
use crate::config::ConfigLoader;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Do not echo the daemon log
    #[arg(long)]
    pub no_log: bool,
}

pub async fn run(args: RunArgs, explicit: Option<&Path>) -> Result<()> {
    let config = ConfigLoader::load(explicit)?;
    let supervisor = Supervisor::with_controller(config.daemon, None)?;
    let mut changes = state_changes(&supervisor);

    if let Err(e) = supervisor.request_start() {
        supervisor.shutdown().await;
        return Err(e.into());
    }
    let mut echo = LogEcho::new((!args.no_log).then(|| supervisor.observe_log()));

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping i2pd");
                break Ok(());
            }
            change = changes.recv() => {
                let Some(change) = change else { break Ok(()) };
                if let Some(result) = outcome_of(&change) {
                    break result;
                }
            }
            line = echo.next_line(&supervisor) => println!("{}", line),
        }
    };

    echo.close(&supervisor).await;
    supervisor.shutdown().await;
    outcome
}

/// Echoes daemon log lines, following the file across deletion.
///
/// A log that disappears is watched for again; any other read failure
/// ends the echo while the daemon keeps running.
struct LogEcho {
    sub: Option<LogSubscription>,
    source_lost: bool,
}

impl LogEcho {
    fn new(sub: Option<LogSubscription>) -> Self {
        Self {
            sub,
            source_lost: false,
        }
    }

    /// Next line to print. Pends forever once echoing has ended.
    async fn next_line(&mut self, supervisor: &Supervisor) -> String {
        loop {
            let Some(sub) = self.sub.as_mut() else {
                return std::future::pending().await;
            };
            match sub.next().await {
                Some(Ok(LogEvent::Line(line))) => return line.text,
                Some(Ok(LogEvent::Discontinuity { reason })) => {
                    info!(?reason, "Log file restarted");
                }
                Some(Err(TailError::SourceLost(path))) => {
                    warn!(path = %path.display(), "Log file disappeared, waiting for it");
                    self.source_lost = true;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Log read failed");
                    self.source_lost = false;
                }
                None if self.source_lost => {
                    self.source_lost = false;
                    self.sub = Some(supervisor.observe_log());
                }
                None => {
                    warn!("No longer echoing the daemon log");
                    self.sub = None;
                }
            }
        }
    }

    async fn close(self, supervisor: &Supervisor) {
        if let Some(mut sub) = self.sub {
            supervisor.stop_observing_log(&mut sub).await;
        }
    }
}

/// `Some` once the foreground run is over
fn outcome_of(change: &StateChange) -> Option<Result<()>> {
    if change.is_redelivery() {
        return None;
    }
    match change.to {
        DaemonState::Running => {
            info!("i2pd is running");
            None
        }
        DaemonState::InstalledIdle if change.from != DaemonState::Error => {
            info!("i2pd exited");
            Some(Ok(()))
        }
        DaemonState::NotInstalled => Some(Err(anyhow!("i2pd binary disappeared while running"))),
        DaemonState::Error => {
            let reason = change
                .failure
                .as_ref()
                .map(|f| format!("{}: {}", f.kind, f.message))
                .unwrap_or_else(|| "unknown error".to_string());
            Some(Err(anyhow!("i2pd failed ({})", reason)))
        }
        _ => None,
    }
}
