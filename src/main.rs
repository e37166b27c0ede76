//! # chanlog CLI
//!
//! ## Usage
//!
//! ```bash
//! chanlog --config ./config/chanlog.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chanlog init` | Create the log and failure directories and the search index |
//! | `chanlog run` | Log and index JSON-lines events read from stdin |
//! | `chanlog search` | Search indexed events, grouped by log file |
//! | `chanlog import <files…>` | Index existing log files |
//! | `chanlog replay <files…>` | Resubmit failed-batch files |
//! | `chanlog partitions` | List indexed partitions with document counts |
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG` to change the
//! level (default `chanlog=info`). Command output goes to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chanlog::{backend, config, feed, importer, replay, search, stats};

/// chanlog: durable per-day channel logs plus a searchable index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chanlog.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "chanlog",
    about = "Channel event logger with durable per-day logs and a searchable index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chanlog.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the log root, the failure directory and the search index.
    ///
    /// Idempotent: running it again against an existing index is safe.
    Init,

    /// Log events read from stdin until end of input or Ctrl-C.
    ///
    /// Each line is one JSON event (`{"kind":"message","channel":"#general",…}`).
    /// Pending documents get a final bounded flush on exit.
    Run,

    /// Search indexed events.
    Search {
        /// Exact nick of the actor.
        #[arg(long)]
        actor: Option<String>,

        /// Words that must all appear in the line. Taken literally.
        #[arg(long, alias = "formatted")]
        text: Option<String>,

        /// Restrict to these channels (repeatable). Defaults to all allowed channels.
        #[arg(long = "channel")]
        channels: Vec<String>,

        /// Print the grouped results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Index existing log files named `<channel>.<YYYY-MM-DD>`.
    Import {
        /// Log files to import.
        files: Vec<PathBuf>,

        /// Import every log file under the configured log root.
        #[arg(long)]
        all: bool,

        /// Create the index if it does not exist yet.
        #[arg(long, short = 'c')]
        create_index: bool,
    },

    /// Resubmit failed-batch files from the failure directory.
    Replay {
        /// Failure files to resubmit.
        files: Vec<PathBuf>,

        /// Delete each file once the backend has accepted it.
        #[arg(long)]
        remove: bool,
    },

    /// List indexed partitions (channel-days) and their document counts.
    Partitions {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chanlog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            backend::run_init(&cfg).await?;
        }
        Commands::Run => {
            feed::run_feed(&cfg).await?;
        }
        Commands::Search {
            actor,
            text,
            channels,
            json,
        } => {
            search::run_search(&cfg, actor, text, channels, json).await?;
        }
        Commands::Import {
            files,
            all,
            create_index,
        } => {
            importer::run_import(&cfg, files, all, create_index).await?;
        }
        Commands::Replay { files, remove } => {
            replay::run_replay(&cfg, files, remove).await?;
        }
        Commands::Partitions { json } => {
            stats::run_partitions(&cfg, json).await?;
        }
    }

    Ok(())
}
