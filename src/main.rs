//! # Lumina CLI (`lumina`)
//!
//! ## Usage
//!
//! ```bash
//! lumina --config ./config/lumina.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lumina init` | Create the data directory, registry and index |
//! | `lumina ingest <paths...>` | Ingest files and directories |
//! | `lumina ingest-url <url>` | Download and ingest one document |
//! | `lumina ask "<question>"` | Answer a question with citations |
//! | `lumina documents` | List tracked documents |
//! | `lumina delete <id>` | Delete a document and its vectors |
//! | `lumina clear` | Delete every document |
//! | `lumina stats` | Corpus statistics |
//!
//! Logs go to stderr (`RUST_LOG`, default `lumina_rag=info`); command
//! output goes to stdout.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lumina_rag::config;
use lumina_rag::corpus::Corpus;
use lumina_rag::{commands, stats};

/// Lumina: ask questions about your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lumina.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lumina",
    about = "Lumina: ask questions about your documents, answered with citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lumina.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory with an empty registry and index.
    ///
    /// Idempotent: an existing corpus is opened and left as is.
    Init,

    /// Ingest files or directories.
    ///
    /// Directories are walked recursively; files with unsupported
    /// extensions are skipped. Documents are processed concurrently and
    /// one failure does not stop the others.
    Ingest {
        /// Files or directories.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Download a document and ingest it.
    IngestUrl { url: String },

    /// Ask a question.
    Ask {
        question: String,

        /// Image whose text is added to the question (OCR).
        #[arg(long, conflicts_with = "image_data")]
        image: Option<PathBuf>,

        /// Image as base64 or a `data:` URL.
        #[arg(long)]
        image_data: Option<String>,

        /// Number of chunks to retrieve (default: `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// List tracked documents with status and chunk count.
    Documents,

    /// Delete a document by id.
    Delete { id: String },

    /// Delete every document and vector.
    Clear,

    /// Show corpus statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lumina_rag=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    match cli.command {
        Commands::Init => {
            commands::run_init(cfg).await?;
        }
        Commands::Ingest { paths } => {
            commands::run_ingest(cfg, &paths).await?;
        }
        Commands::IngestUrl { url } => {
            commands::run_ingest_url(cfg, &url).await?;
        }
        Commands::Ask {
            question,
            image,
            image_data,
            k,
        } => {
            commands::run_ask(cfg, &question, image.as_deref(), image_data.as_deref(), k).await?;
        }
        Commands::Documents => {
            commands::run_documents(cfg).await?;
        }
        Commands::Delete { id } => {
            commands::run_delete(cfg, &id).await?;
        }
        Commands::Clear => {
            commands::run_clear(cfg).await?;
        }
        Commands::Stats => {
            let corpus = Corpus::from_config(cfg).await?;
            stats::run_stats(&corpus).await?;
        }
    }

    Ok(())
}
