//! # docvault CLI
//!
//! ```bash
//! docvault --config ./config/docvault.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docvault init` | Create both SQLite databases and run migrations |
//! | `docvault sync <root>` | Reconcile a directory tree, ageing out vanished files |
//! | `docvault index <path>` | Add or update a file or tree without ageing anything |
//! | `docvault search "<query>"` | Search indexed documents |
//! | `docvault delete --hash <fp>` | Delete a document by fingerprint or path |
//! | `docvault status` | Record counts and database sizes |
//! | `docvault files` | List tracked files, newest first |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `docvault=info`). Exit status is non-zero only when a store
//! operation fails; per-file problems are reported in the summary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docvault::progress::ProgressMode;
use docvault::{config, migrate, search, status, sync_cmd};

/// docvault: hash-based document tracking and search.
#[derive(Parser)]
#[command(
    name = "docvault",
    version,
    about = "Track documents by content hash; moves and renames never trigger re-indexing"
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create both databases. Safe to run repeatedly.
    Init,

    /// Reconcile everything under a directory.
    ///
    /// New content is extracted and indexed, moved content is re-pointed,
    /// and records under the root that were not seen are marked missing and
    /// eventually removed (`sync.missing_syncs_before_delete`).
    Sync {
        root: PathBuf,

        /// Print what would change without touching either store.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr. Defaults to human on a TTY, otherwise off.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Add or update one file or a tree. Never marks anything missing.
    Index {
        path: PathBuf,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        #[arg(long)]
        json: bool,
    },

    /// Search indexed documents.
    Search {
        query: String,

        /// Number of results (default: `retrieval.default_top_k`).
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Remove a document from both the store and the index.
    Delete {
        /// Full hex fingerprint.
        #[arg(long, conflicts_with = "path", required_unless_present = "path")]
        hash: Option<String>,

        /// Canonical or alias path of the document.
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Show record counts and database sizes.
    Status,

    /// List tracked files, newest first.
    Files {
        /// Only paths containing this substring.
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Include missing and tombstoned records.
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "docvault=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
            println!("  metadata: {}", cfg.db.path.display());
            println!("  index: {}", cfg.index_path().display());
        }
        Commands::Sync {
            root,
            dry_run,
            progress,
            json,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            sync_cmd::run_sync(&cfg, &root, dry_run, progress, json).await?;
        }
        Commands::Index {
            path,
            progress,
            json,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            sync_cmd::run_index(&cfg, &path, progress, json).await?;
        }
        Commands::Search { query, top_k, json } => {
            search::run_search(&cfg, &query, top_k, json).await?;
        }
        Commands::Delete { hash, path } => {
            sync_cmd::run_delete(&cfg, hash.as_deref(), path.as_deref()).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Files { name, limit, all } => {
            status::run_files(&cfg, name.as_deref(), limit, all).await?;
        }
    }

    Ok(())
}
