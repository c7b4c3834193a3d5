//! Status command

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use itpd_core::{DaemonState, Supervisor, UiHints};
use serde::Serialize;

use crate::config::ConfigLoader;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    state: DaemonState,
    installed: bool,
    hints: UiHints,
    binary_path: PathBuf,
    log_path: PathBuf,
}

pub async fn run(args: StatusArgs, explicit: Option<&Path>) -> Result<()> {
    let config = ConfigLoader::load(explicit)?;
    let supervisor = Supervisor::with_controller(config.daemon, None)?;

    let state = supervisor.refresh_state().await;
    let report = StatusReport {
        state,
        installed: supervisor.is_installed(),
        hints: state.hints(),
        binary_path: supervisor.config().binary_path.clone(),
        log_path: supervisor.config().log_path.clone(),
    };
    supervisor.shutdown().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &StatusReport) {
    println!("State:     {}", report.state);
    println!(
        "Installed: {}",
        if report.installed { "yes" } else { "no" }
    );
    println!("Binary:    {}", report.binary_path.display());
    println!("Log:       {}", report.log_path.display());
}
