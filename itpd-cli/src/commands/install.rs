//! Install command

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use clap::Args;
use itpd_core::{BundleInstaller, DaemonState, Installer, Supervisor};
use tracing::info;

use super::state_changes;
use crate::config::ConfigLoader;

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Bundle directory or binary to install from (overrides `[install] bundle`)
    #[arg(long, value_name = "PATH")]
    pub bundle: Option<PathBuf>,
}

pub async fn run(args: InstallArgs, explicit: Option<&Path>) -> Result<()> {
    let config = ConfigLoader::load(explicit)?;
    let Some(bundle) = args.bundle.or(config.install.bundle) else {
        bail!("No bundle given; pass --bundle or set `bundle` under [install]");
    };

    let installer: Arc<dyn Installer> = Arc::new(BundleInstaller::new(bundle.clone()));
    let supervisor = Supervisor::with_controller(config.daemon, Some(installer))?;
    if supervisor.is_installed() {
        println!(
            "i2pd is already installed at {}",
            supervisor.config().binary_path.display()
        );
        supervisor.shutdown().await;
        return Ok(());
    }

    let mut changes = state_changes(&supervisor);
    if let Err(e) = supervisor.request_install() {
        supervisor.shutdown().await;
        return Err(e.into());
    }
    info!(bundle = %bundle.display(), "Installing i2pd");

    let outcome = loop {
        let Some(change) = changes.recv().await else {
            break Err(anyhow!("Supervisor stopped before the install finished"));
        };
        match change.to {
            DaemonState::InstalledIdle => break Ok(()),
            DaemonState::Error => {
                let reason = change
                    .failure
                    .map(|f| f.message)
                    .unwrap_or_else(|| "unknown error".to_string());
                break Err(anyhow!("Install failed: {}", reason));
            }
            _ => {}
        }
    };
    supervisor.shutdown().await;

    outcome?;
    println!(
        "Installed i2pd to {}",
        supervisor.config().binary_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        install: InstallArgs,
    }

    #[test]
    fn test_install_without_bundle() {
        let cli = TestCli::parse_from(["test"]);
        assert!(cli.install.bundle.is_none());
    }

    #[test]
    fn test_install_with_bundle() {
        let cli = TestCli::parse_from(["test", "--bundle", "/opt/bundles/i2pd"]);
        assert_eq!(cli.install.bundle, Some(PathBuf::from("/opt/bundles/i2pd")));
    }
}
