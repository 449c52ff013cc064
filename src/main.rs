//! # Estate Feed CLI (`estate`)
//!
//! ## Usage
//!
//! ```bash
//! estate --config ./config/estate.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `estate init` | Create the SQLite database and run schema migrations |
//! | `estate sources` | List tracked channels and their watermarks |
//! | `estate sync <mode>` | Run `backfill`, `incremental` or `check-deleted` |
//! | `estate extract` | Fill typed fields from listing descriptions |
//! | `estate get <id>` | Print one listing |
//! | `estate delete <id>` | Tombstone and delete one listing |
//! | `estate serve` | Start the HTTP control surface |
//!
//! Secrets come from the environment (`ESTATE_CHANNEL_TOKEN`,
//! `ESTATE_API_TOKEN`, `AWS_*`), optionally via a `.env` file.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use estate_feed::models::SyncMode;
use estate_feed::{config, extract, get, ingest, migrate, server, sources};

/// Estate Feed: mirror a real-estate channel into a structured catalog.
#[derive(Parser)]
#[command(name = "estate", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/estate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// List tracked channels and their sync watermarks.
    Sources,

    /// Run one sync procedure against the configured channel.
    Sync {
        mode: ModeArg,

        /// Run field extraction over the listings the run produced.
        #[arg(long)]
        extract: bool,
    },

    /// Extract typed fields from listing descriptions.
    ///
    /// Without `--listing`, every listing is processed.
    Extract {
        /// Restrict extraction to these listing ids (repeatable).
        #[arg(long = "listing")]
        listings: Vec<String>,

        /// Print what would be extracted from TEXT and exit.
        #[arg(long, value_name = "TEXT")]
        preview: Option<String>,
    },

    /// Print a listing with its images.
    Get { id: String },

    /// Tombstone a listing, remove its media, and delete it.
    Delete {
        id: String,

        /// Reason code stored on the tombstone.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Start the HTTP control surface.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Backfill,
    Incremental,
    CheckDeleted,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Backfill => SyncMode::Backfill,
            ModeArg::Incremental => SyncMode::Incremental,
            ModeArg::CheckDeleted => SyncMode::CheckDeleted,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "estate_feed=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Preview needs no database or config
    if let Commands::Extract {
        preview: Some(ref text),
        ..
    } = cli.command
    {
        extract::print_preview(text);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Sync { mode, extract } => {
            ingest::run_sync(&cfg, mode.into(), extract).await?;
        }
        Commands::Extract { listings, preview } => {
            extract::run_extract_command(&cfg, &listings, preview.as_deref()).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Delete { id, reason } => {
            get::run_delete(&cfg, &id, reason.as_deref()).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
