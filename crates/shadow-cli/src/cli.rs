use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::commands::common::parse_param;

#[derive(Parser)]
#[command(name = "shadow")]
#[command(about = "Keep local shadow copies of remote resources in sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the models file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronize models with their remote collections
    Sync {
        /// Comma-separated models to synchronize (all when omitted)
        #[arg(long, value_delimiter = ',', value_name = "NAMES")]
        models: Vec<String>,
        /// Extra parameter forwarded to the change feed
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recorded checkpoints
    Checkpoints {
        /// Only show checkpoints for this model
        #[arg(long, value_name = "NAME")]
        model: Option<String>,
        /// Number of checkpoints to show per model
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered models
    Models {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show local records for a remote id
    Show {
        /// Model name
        model: String,
        /// Remote id
        remote_id: String,
        /// Also resolve delegated attributes from the remote
        #[arg(long)]
        remote: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
