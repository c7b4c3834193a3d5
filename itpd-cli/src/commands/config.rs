//! Inspect the layered configuration

use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use itpd_core::DaemonConfig;

use crate::config::{ConfigLayer, ConfigLoader};

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the validated configuration after merging every layer
    Show,
    /// List the config files consulted and whether each was applied
    Path,
}

pub fn run(args: ConfigArgs, explicit: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show(explicit),
        ConfigCommands::Path => {
            for layer in ConfigLoader::layers(explicit) {
                println!("{}", describe_layer(&layer, layer.exists()));
            }
            Ok(())
        }
    }
}

fn show(explicit: Option<&Path>) -> Result<()> {
    let config = ConfigLoader::load(explicit)?;
    print!("{}", toml::to_string_pretty(&config)?);
    println!();
    println!("{}", binary_line(&config.daemon));
    Ok(())
}

fn describe_layer(layer: &ConfigLayer, exists: bool) -> String {
    let status = match (exists, layer.required) {
        (true, _) => "applied",
        (false, true) => "missing (required)",
        (false, false) => "absent",
    };
    format!("{:<9} {:<18} {}", layer.name, status, layer.path.display())
}

/// Where `binary_path` resolves right now
fn binary_line(daemon: &DaemonConfig) -> String {
    match daemon.resolve_binary() {
        Some(path) => format!("# i2pd binary: {}", path.display()),
        None => format!(
            "# i2pd binary: not found ({} does not resolve)",
            daemon.binary_path.display()
        ),
    }
}
