//! chatgate - main entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatgate::cli::{run_allow_command, run_pairing_command, run_status_command, Cli, Command};
use chatgate::config::Config;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let _ = dotenvy::dotenv();
    let mut config = Config::from_env()?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }

    match cli.command {
        Command::Pairing(cmd) => run_pairing_command(&config, cmd),
        Command::Allow(cmd) => run_allow_command(&config, cmd),
        Command::Status => run_status_command(&config),
    }
}
