//! # Memora CLI (`memora`)
//!
//! Imports chat archives into a local SQLite database and searches them.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `memora init` | Create the database and apply schema migrations |
//! | `memora ingest <files>...` | Import archive files |
//! | `memora threads` | List imported threads |
//! | `memora thread <id>` | Print one thread in timestamp order |
//! | `memora search "<query>"` | Stream a keyword search and export the hits |
//! | `memora recall '$RECALL <kw>'` | Recall search, chunked or summarized |
//! | `memora clear` | Delete every imported record |
//! | `memora stats` | Record counts and database info |
//!
//! ## Examples
//!
//! ```bash
//! memora ingest ~/Downloads/export/conversations.json ~/Downloads/export/chat.html
//! memora search "quarterly budget" --format md --output budget.md
//! memora recall '$RECALL budget' --summarize --config ./config/memora.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use memora::config::{self, Config};
use memora::export::ExportFormat;
use memora::progress::ProgressMode;
use memora::{cli, migrate, stats};

const DEFAULT_CONFIG: &str = "./config/memora.toml";

/// Import chat archives and search them locally.
#[derive(Parser)]
#[command(
    name = "memora",
    about = "Memora — a local-first chat-archive importer with streaming keyword search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/memora.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `[db].path` from the configuration.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; an older database is upgraded in place.
    Init,

    /// Import archive files.
    ///
    /// Recognized names: `conversations.json` (and other `.json`/`.jsonl`
    /// dumps), `chat.html`, `message_feedback.json`, `user.json`. Files are
    /// processed in the order given; a malformed file is reported and
    /// skipped.
    Ingest {
        /// Files to import.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Progress output on stderr.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List imported threads, newest first.
    Threads {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print every message of one thread.
    Thread {
        /// Thread id (see `memora threads`).
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Search message text (case-insensitive substring).
    Search {
        query: String,

        /// Results per streamed batch.
        #[arg(long)]
        batch: Option<usize>,

        /// Stop after this many matches.
        #[arg(long)]
        max: Option<usize>,

        /// Output format for the merged hits.
        #[arg(long, value_enum, default_value = "txt")]
        format: ExportFormat,

        /// Write to this file instead of stdout. A directory receives
        /// `merge_<query>.<format>`.
        #[arg(long, short)]
        output: Option<PathBuf>,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Recall a topic: `$RECALL <keyword>` or a bare keyword.
    ///
    /// Prints the hits packed into summarizer-sized chunks, or with
    /// `--summarize` runs them through `[recall].command`.
    Recall {
        command: String,

        #[arg(long)]
        max: Option<usize>,

        /// Summarize with the configured command.
        #[arg(long)]
        summarize: bool,

        /// With `--summarize`, print the digest as JSON.
        #[arg(long)]
        json: bool,

        /// Output file, or a directory for `merge_<keyword>.<ext>`.
        #[arg(long, short)]
        output: Option<PathBuf>,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Delete all threads, messages, feedback and users.
    Clear,

    /// Show record counts and database info.
    Stats {
        #[arg(long)]
        json: bool,
    },
}

fn load(args: &Cli) -> Result<Config> {
    let mut cfg = match &args.config {
        Some(path) => config::load_config(path)?,
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG);
            if path.exists() {
                config::load_config(&path)?
            } else {
                Config::minimal()
            }
        }
    };
    if let Some(db) = &args.db {
        cfg.db.path = db.clone();
    }
    Ok(cfg)
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let cfg = load(&args)?;
    init_logging(&cfg);

    let progress = |mode: Option<ProgressMode>| mode.unwrap_or_else(ProgressMode::default_for_tty);

    match args.command {
        Commands::Init => {
            let found = migrate::run_migrations(&cfg).await?;
            if found == migrate::SCHEMA_VERSION {
                println!("Database already at schema v{}.", found);
            } else {
                println!("Database initialized successfully.");
            }
        }
        Commands::Ingest {
            files,
            progress: mode,
        } => {
            cli::run_ingest(&cfg, &files, progress(mode)).await?;
        }
        Commands::Threads { json } => {
            cli::run_threads(&cfg, json).await?;
        }
        Commands::Thread { id, json } => {
            cli::run_thread(&cfg, &id, json).await?;
        }
        Commands::Search {
            query,
            batch,
            max,
            format,
            output,
            progress: mode,
        } => {
            cli::run_search(
                &cfg,
                &query,
                batch,
                max,
                format,
                output.as_deref(),
                progress(mode),
            )
            .await?;
        }
        Commands::Recall {
            command,
            max,
            summarize,
            json,
            output,
            progress: mode,
        } => {
            cli::run_recall(
                &cfg,
                &command,
                max,
                summarize,
                json,
                output.as_deref(),
                progress(mode),
            )
            .await?;
        }
        Commands::Clear => {
            cli::run_clear(&cfg).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
    }

    Ok(())
}
