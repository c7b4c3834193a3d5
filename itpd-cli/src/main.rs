use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "itpd", about = "Supervise a local i2pd daemon")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file applied on top of the user and project configs
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Install the daemon from a bundle
    Install(commands::install::InstallArgs),
    /// Print the daemon log
    Logs(commands::logs::LogsArgs),
    /// Run the daemon in the foreground
    Run(commands::run::RunArgs),
    /// Show daemon state
    Status(commands::status::StatusArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { "debug" } else { "info" };
        tracing_subscriber::EnvFilter::new(level)
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Config(args) => commands::config::run(args, config),
        Commands::Install(args) => commands::install::run(args, config).await,
        Commands::Logs(args) => commands::logs::run(args, config).await,
        Commands::Run(args) => commands::run::run(args, config).await,
        Commands::Status(args) => commands::status::run(args, config).await,
    }
}
