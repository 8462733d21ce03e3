//! Shadow CLI - keep local shadow records in step with remote collections
//!
//! Reads the models file, opens the local database and drives
//! reconciliation passes from the terminal.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::checkpoints::run_checkpoints;
use crate::commands::common::{open_service, sync_params};
use crate::commands::completions::run_completions;
use crate::commands::models::run_models;
use crate::commands::show::run_show;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(error) => {
            eprintln!("Error: {error}");
            std::process::exit(1);
        }
    }
}

/// Returns `false` when a command finished but reported failures
async fn run() -> Result<bool, CliError> {
    dotenvy::dotenv().ok();

    // stderr keeps `--json` output on stdout parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shadow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        run_completions(*shell, output.as_deref())?;
        return Ok(true);
    }

    let service = open_service(cli.config, cli.db_path).await?;

    match cli.command {
        Commands::Sync {
            models,
            params,
            json,
        } => return run_sync(&service, &models, &sync_params(&params), json).await,
        Commands::Checkpoints { model, limit, json } => {
            run_checkpoints(&service, model.as_deref(), limit, json).await?;
        }
        Commands::Models { json } => run_models(&service, json).await?,
        Commands::Show {
            model,
            remote_id,
            remote,
            json,
        } => run_show(&service, &model, &remote_id, remote, json).await?,
        Commands::Completions { .. } => {}
    }

    Ok(true)
}
