//! vaultscan -- command-line front end for repository artifact scanning

mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;

use vaultscan_core::config::{GeneralConfig, VaultscanConfig};

use cli::{Cli, Commands};
use error::CliError;
use output::OutputWriter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init_tracing(&logging_config(&cli).await)?;
    vaultscan_core::metrics::describe_all();
    tracing::debug!(config = %cli.config.display(), "vaultscan starting");

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
    Ok(())
}

/// `[general]` from the config file when readable, with `--log-level` on top.
///
/// A broken config file must not prevent `config validate` from reporting it,
/// so load failures fall back to defaults here.
async fn logging_config(cli: &Cli) -> GeneralConfig {
    let mut general = match VaultscanConfig::from_file(&cli.config).await {
        Ok(mut config) => {
            config.apply_env_overrides();
            config.general
        }
        Err(_) => GeneralConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        general.log_level = level.clone();
    }
    general
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    match cli.command {
        Commands::Config(args) => commands::config::execute(args, &cli.config, &writer).await,
        Commands::Plan(args) => commands::plan::execute(args, &cli.config, &writer).await,
        Commands::Status(args) => commands::status::execute(args, &writer).await,
        Commands::Reset(args) => commands::reset::execute(args, &cli.config, &writer).await,
    }
}
