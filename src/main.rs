//! # rca-ingest CLI
//!
//! Ingests documents from an S3 bucket into a Qdrant collection.
//!
//! ## Usage
//!
//! ```bash
//! rca-ingest --bucket <bucket> [--prefix <prefix>] [--collection <name>] \
//!     [--local-dir <dir>] [--no-delete-local] [--dry-run]
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Ingest everything under rcas/ into the default "incidents" collection
//! rca-ingest --bucket rca-docs --prefix rcas/
//!
//! # Show what would be written without touching Qdrant
//! rca-ingest --bucket rca-docs --prefix rcas/ --dry-run
//!
//! # MinIO, four objects at a time, only markdown and PDFs
//! AWS_ENDPOINT_URL=http://localhost:9000 rca-ingest --bucket rca-docs \
//!     --workers 4 --include '**/*.md' --include '**/*.pdf'
//! ```
//!
//! Diagnostics go to stderr and are controlled with `RUST_LOG`
//! (default `warn`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rca_ingest::config::{self, Config};
use rca_ingest::connector_s3::S3Client;
use rca_ingest::embedding::create_provider;
use rca_ingest::ingest::{run_ingest, Destination, IngestRun};
use rca_ingest::qdrant::QdrantIndex;

/// Ingest documents from S3 into a Qdrant collection.
///
/// Each object under the prefix is downloaded, decoded (text, PDF, or
/// Office documents), split into overlapping chunks, embedded, and upserted
/// with a deterministic ID so re-runs overwrite instead of duplicating.
#[derive(Parser, Debug)]
#[command(name = "rca-ingest", version)]
struct Cli {
    /// S3 bucket to read from.
    #[arg(long)]
    bucket: String,

    /// Only ingest keys starting with this prefix.
    #[arg(long, default_value = "")]
    prefix: String,

    /// Destination collection (default: `incidents`).
    #[arg(long)]
    collection: Option<String>,

    /// Directory to stage downloads in. A temporary directory is used
    /// when omitted.
    #[arg(long)]
    local_dir: Option<PathBuf>,

    /// Keep staged files instead of deleting them after processing.
    #[arg(long)]
    no_delete_local: bool,

    /// Compute chunk IDs and counts without embedding or writing.
    #[arg(long)]
    dry_run: bool,

    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of objects processed concurrently.
    #[arg(long)]
    workers: Option<usize>,

    /// Only ingest keys (relative to the prefix) matching this glob. Repeatable.
    #[arg(long = "include")]
    include: Vec<String>,

    /// Skip keys (relative to the prefix) matching this glob. Repeatable.
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    /// Chunk size in characters.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Overlap between consecutive chunks in characters.
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Qdrant base URL (overrides `QDRANT_URL`).
    #[arg(long)]
    qdrant_url: Option<String>,
}

impl Cli {
    /// Layer command-line flags over the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(ref collection) = self.collection {
            config.ingest.collection = collection.clone();
        }
        if let Some(workers) = self.workers {
            config.ingest.workers = workers;
        }
        if !self.include.is_empty() {
            config.s3.include_globs = self.include.clone();
        }
        if !self.exclude.is_empty() {
            config.s3.exclude_globs = self.exclude.clone();
        }
        if let Some(size) = self.chunk_size {
            config.chunking.chunk_size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            config.chunking.chunk_overlap = overlap;
        }
        if let Some(ref url) = self.qdrant_url {
            config.qdrant.url = url.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = config::read_config(cli.config.as_deref())?;
    cli.apply(&mut cfg);
    cfg.validate()?;

    let mut run = IngestRun::from_config(&cli.prefix, &cfg);
    run.local_dir = cli.local_dir.clone();
    run.cleanup = !cli.no_delete_local;

    let store = Arc::new(S3Client::new(&cli.bucket, &cfg.s3)?);

    let destination = if cli.dry_run {
        Destination::DryRun
    } else {
        let index = Arc::new(QdrantIndex::new(&cfg.qdrant)?);
        let provider = create_provider(&cfg.embedding).await?;
        Destination::Index { index, provider }
    };

    let report = run_ingest(&run, store, destination).await?;
    tracing::info!(
        objects = report.objects_seen(),
        succeeded = report.succeeded(),
        total_chunks = report.total_chunks,
        "run finished"
    );

    Ok(())
}
