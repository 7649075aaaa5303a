//! Ingestion pipeline orchestration.
//!
//! Drives one run end to end:
//!
//! ```text
//! BOOTSTRAP → ENUMERATE → for each object: STAGE → DECODE → IDENTIFY → UPSERT → CLEANUP → REPORT
//! ```
//!
//! Bootstrap and enumeration errors are fatal and returned from
//! [`run_ingest`]. Anything that goes wrong while processing a single object
//! is recorded as an [`ObjectFailure`] and the run moves on, including a
//! panic in the task processing it. Up to
//! `workers` objects are processed at once; bootstrap always completes
//! before the first one is scheduled.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::{Id, JoinError, JoinSet};

use crate::bootstrap::{ensure_collection, BootstrapOutcome, SchemaPolicy};
use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config, RetryConfig};
use crate::connector_s3::{KeyFilter, ObjectLister, ObjectStore};
use crate::embedding::EmbeddingProvider;
use crate::error::{ObjectFailure, Stage};
use crate::extract::decode_file;
use crate::models::{ChunkMetadata, SourceObject};
use crate::qdrant::{Distance, VectorIndex, VectorParams};
use crate::stage::{object_basename, stage_object, StagingArea};
use crate::upsert::UpsertWriter;

/// Parameters of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestRun {
    pub prefix: String,
    pub collection: String,
    /// Staging directory; a temporary one is generated when `None`.
    pub local_dir: Option<PathBuf>,
    /// Delete staged files (and a generated staging directory) when done.
    pub cleanup: bool,
    pub workers: usize,
    pub chunking: ChunkingConfig,
    pub retry: RetryConfig,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub distance: Distance,
    pub schema_policy: SchemaPolicy,
    pub embed_batch_size: usize,
    pub max_points_per_request: Option<usize>,
}

impl IngestRun {
    /// Run parameters from configuration, with cleanup enabled and a
    /// generated staging directory.
    pub fn from_config(prefix: &str, config: &Config) -> Self {
        Self {
            prefix: prefix.to_string(),
            collection: config.ingest.collection.clone(),
            local_dir: None,
            cleanup: true,
            workers: config.ingest.workers.max(1),
            chunking: config.chunking,
            retry: config.ingest.retry,
            include_globs: config.s3.include_globs.clone(),
            exclude_globs: config.s3.exclude_globs.clone(),
            distance: config.qdrant.distance,
            schema_policy: config.qdrant.schema_policy,
            embed_batch_size: config.embedding.batch_size,
            max_points_per_request: config.qdrant.max_points_per_request,
        }
    }
}

/// Where chunks go.
pub enum Destination {
    /// Compute identifiers and counts; touch neither the index nor the
    /// embedding provider.
    DryRun,
    Index {
        index: Arc<dyn VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
    },
}

/// Result of processing one object.
#[derive(Debug, Clone)]
pub struct ObjectOutcome {
    pub key: String,
    /// Chunks written, or the failure that stopped the object.
    pub result: Result<usize, ObjectFailure>,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub dry_run: bool,
    /// `None` in dry-run mode, where the index is not contacted.
    pub bootstrap: Option<BootstrapOutcome>,
    /// Outcomes in completion order.
    pub outcomes: Vec<ObjectOutcome>,
    /// Chunks written by successfully processed objects.
    pub total_chunks: usize,
    /// Generated staging directory left on disk because cleanup was disabled.
    pub kept_staging_dir: Option<PathBuf>,
}

impl IngestReport {
    pub fn objects_seen(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ObjectFailure> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    /// Chunks written for `key`, if it was processed successfully.
    pub fn chunks_for(&self, key: &str) -> Option<usize> {
        self.outcomes
            .iter()
            .find(|o| o.key == key)
            .and_then(|o| o.result.as_ref().ok().copied())
    }

    fn record(&mut self, outcome: ObjectOutcome) {
        match &outcome.result {
            Ok(n) => {
                self.total_chunks += n;
                println!("  {}: ok, {} chunks", outcome.key, n);
            }
            Err(failure) => {
                tracing::warn!(
                    key = %failure.key,
                    stage = %failure.stage,
                    error = %failure.message,
                    "object skipped"
                );
                println!(
                    "  {}: skipped ({}): {}",
                    outcome.key, failure.stage, failure.message
                );
            }
        }
        self.outcomes.push(outcome);
    }
}

/// Shared, read-only state for per-object tasks.
struct ObjectContext {
    store: Arc<dyn ObjectStore>,
    writer: UpsertWriter,
    area: StagingArea,
    chunking: ChunkingConfig,
    retry: RetryConfig,
}

/// Run the pipeline over every object under `run.prefix`.
pub async fn run_ingest(
    run: &IngestRun,
    store: Arc<dyn ObjectStore>,
    destination: Destination,
) -> Result<IngestReport> {
    let filter = KeyFilter::new(&run.prefix, &run.include_globs, &run.exclude_globs)
        .context("Invalid include/exclude glob")?;

    let mut report = IngestReport {
        dry_run: matches!(destination, Destination::DryRun),
        ..IngestReport::default()
    };

    let writer = match destination {
        Destination::DryRun => UpsertWriter::dry_run(&run.collection),
        Destination::Index { index, provider } => {
            let params = VectorParams {
                size: provider.dims() as u64,
                distance: run.distance,
            };
            let outcome =
                ensure_collection(index.as_ref(), &run.collection, params, run.schema_policy)
                    .await?;
            match outcome {
                BootstrapOutcome::Created => println!(
                    "Created collection '{}' (size {}, {:?})",
                    run.collection, params.size, params.distance
                ),
                BootstrapOutcome::Existing => {
                    println!("Using existing collection '{}'", run.collection)
                }
            }
            report.bootstrap = Some(outcome);
            UpsertWriter::new(
                index,
                provider,
                &run.collection,
                run.embed_batch_size,
                run.retry,
            )
            .with_max_points_per_request(run.max_points_per_request)
        }
    };

    let area = StagingArea::new(run.local_dir.as_deref(), run.cleanup)?;
    if area.is_generated() && !run.cleanup {
        println!("Staged files will be kept in {}", area.path().display());
        report.kept_staging_dir = Some(area.path().to_path_buf());
    }

    let ctx = Arc::new(ObjectContext {
        store: Arc::clone(&store),
        writer,
        area,
        chunking: run.chunking,
        retry: run.retry,
    });

    let workers = run.workers.max(1);
    let mut lister = ObjectLister::new(Arc::clone(&store), &run.prefix, filter);
    let mut tasks: JoinSet<ObjectOutcome> = JoinSet::new();
    let mut in_flight: HashMap<Id, String> = HashMap::new();

    loop {
        let object = match lister.next().await {
            Ok(Some(object)) => object,
            Ok(None) => break,
            Err(e) => {
                tasks.shutdown().await;
                return Err(e);
            }
        };

        while tasks.len() >= workers {
            if let Some(joined) = tasks.join_next_with_id().await {
                report.record(settle(joined, &mut in_flight));
            }
        }

        println!("Processing s3://{}/{} ...", store.bucket(), object.key);
        let key = object.key.clone();
        let ctx = Arc::clone(&ctx);
        let handle = tasks.spawn(async move { process_object(&ctx, object).await });
        in_flight.insert(handle.id(), key);
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        report.record(settle(joined, &mut in_flight));
    }

    if let Ok(ctx) = Arc::try_unwrap(ctx) {
        ctx.area.close();
    }

    println!(
        "Ingestion complete. Total chunks processed: {}",
        report.total_chunks
    );
    let failed = report.objects_seen() - report.succeeded();
    println!(
        "  objects: {} ok, {} failed{}",
        report.succeeded(),
        failed,
        if report.dry_run { " (dry run)" } else { "" }
    );

    Ok(report)
}

/// Outcome of a finished worker task; a panic fails only its object.
fn settle(
    joined: Result<(Id, ObjectOutcome), JoinError>,
    in_flight: &mut HashMap<Id, String>,
) -> ObjectOutcome {
    match joined {
        Ok((id, outcome)) => {
            in_flight.remove(&id);
            outcome
        }
        Err(err) => {
            let key = in_flight.remove(&err.id()).unwrap_or_default();
            tracing::error!(key = %key, error = %err, "object worker panicked");
            let err = anyhow::Error::new(err).context("object worker panicked");
            ObjectOutcome {
                result: Err(ObjectFailure::new(&key, Stage::Worker, &err)),
                key,
            }
        }
    }
}

/// Stage, decode, chunk and write one object.
///
/// The staged file is released when this returns, on every path.
async fn process_object(ctx: &ObjectContext, object: SourceObject) -> ObjectOutcome {
    let key = object.key.clone();
    let result = process_stages(ctx, &object).await;
    ObjectOutcome { key, result }
}

async fn process_stages(ctx: &ObjectContext, object: &SourceObject) -> Result<usize, ObjectFailure> {
    let key = object.key.as_str();
    let fail = |stage: Stage| move |err: anyhow::Error| ObjectFailure::new(key, stage, &err);

    let (staged, metadata) = stage_object(ctx.store.as_ref(), object, &ctx.area, &ctx.retry)
        .await
        .map_err(fail(Stage::Stage))?;

    let path = staged.path().to_path_buf();
    let text = tokio::task::spawn_blocking(move || decode_file(&path))
        .await
        .context("decoder panicked")
        .and_then(|decoded| decoded.map_err(anyhow::Error::from))
        .with_context(|| format!("Failed to decode {}", key))
        .map_err(fail(Stage::Decode))?;

    let chunks = chunk_text(key, &text, &ctx.chunking);
    tracing::debug!(key, chars = text.chars().count(), chunks = chunks.len(), "chunked");

    let chunk_metadata =
        ChunkMetadata::for_object(ctx.store.bucket(), object_basename(key), &metadata);
    let written = ctx
        .writer
        .write(&chunk_metadata, &chunks)
        .await
        .map_err(fail(Stage::Upsert))?;

    drop(staged);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HashingEmbedder, InMemoryIndex, InMemoryObjectStore};

    fn run(workers: usize) -> IngestRun {
        let mut run = IngestRun::from_config("rcas/", &Config::default());
        run.workers = workers;
        run.retry = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
        };
        run
    }

    fn destination(index: &Arc<InMemoryIndex>) -> Destination {
        Destination::Index {
            index: index.clone(),
            provider: Arc::new(HashingEmbedder::new(384)),
        }
    }

    #[tokio::test]
    async fn single_text_object_yields_two_chunks() {
        let store = Arc::new(InMemoryObjectStore::new("rca-docs"));
        store.insert("rcas/incident-42.log", "x".repeat(1000).into_bytes());
        let index = Arc::new(InMemoryIndex::new());

        let report = run_ingest(&run(1), store, destination(&index)).await.unwrap();
        assert_eq!(report.total_chunks, 2);
        assert_eq!(report.bootstrap, Some(BootstrapOutcome::Created));
        assert_eq!(index.len("incidents"), 2);
        let point = index
            .point("incidents", crate::chunk::chunk_id("rcas/incident-42.log", 1))
            .unwrap();
        assert_eq!(point.payload["metadata"]["chunk_index"], 1);
        assert_eq!(point.payload["metadata"]["filename"], "incident-42.log");
        assert_eq!(point.payload["metadata"]["bucket"], "rca-docs");
    }

    #[tokio::test]
    async fn failed_download_is_isolated() {
        let store = Arc::new(InMemoryObjectStore::new("rca-docs"));
        store.insert("rcas/a.md", b"alpha".to_vec());
        store.insert("rcas/b.md", b"bravo".to_vec());
        store.fail_download("rcas/b.md");
        let index = Arc::new(InMemoryIndex::new());

        let report = run_ingest(&run(1), store, destination(&index)).await.unwrap();
        assert_eq!(report.succeeded(), 1);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "rcas/b.md");
        assert_eq!(failures[0].stage, Stage::Stage);
        assert_eq!(report.total_chunks, 1);
    }

    #[tokio::test]
    async fn upsert_failure_is_isolated() {
        let store = Arc::new(InMemoryObjectStore::new("rca-docs"));
        store.insert("rcas/a.md", b"alpha".to_vec());
        store.insert("rcas/b.md", b"bravo".to_vec());
        let index = Arc::new(InMemoryIndex::new());
        index.fail_upserts_for("rcas/a.md");

        let report = run_ingest(&run(1), store, destination(&index)).await.unwrap();
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, Stage::Upsert);
        assert_eq!(report.chunks_for("rcas/b.md"), Some(1));
        assert_eq!(index.len("incidents"), 1);
    }

    /// Embeds like [`HashingEmbedder`] but panics on any text mentioning "boom".
    struct PanickingEmbedder(HashingEmbedder);

    #[async_trait::async_trait]
    impl EmbeddingProvider for PanickingEmbedder {
        fn model_name(&self) -> &str {
            self.0.model_name()
        }

        fn dims(&self) -> usize {
            self.0.dims()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("boom")) {
                panic!("embedder blew up");
            }
            self.0.embed(texts).await
        }
    }

    #[tokio::test]
    async fn panicking_worker_fails_only_its_object() {
        for workers in [1, 3] {
            let store = Arc::new(InMemoryObjectStore::new("rca-docs"));
            store.insert("rcas/a.md", b"alpha".to_vec());
            store.insert("rcas/b.md", b"boom".to_vec());
            store.insert("rcas/c.md", b"charlie".to_vec());
            let index = Arc::new(InMemoryIndex::new());
            let destination = Destination::Index {
                index: index.clone(),
                provider: Arc::new(PanickingEmbedder(HashingEmbedder::new(384))),
            };

            let report = run_ingest(&run(workers), store, destination).await.unwrap();
            assert_eq!(report.objects_seen(), 3);
            assert_eq!(report.succeeded(), 2);
            let failures: Vec<_> = report.failures().collect();
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].key, "rcas/b.md");
            assert_eq!(failures[0].stage, Stage::Worker);
            assert_eq!(index.len("incidents"), 2);
        }
    }

    #[tokio::test]
    async fn blank_document_counts_as_success_with_zero_chunks() {
        let store = Arc::new(InMemoryObjectStore::new("rca-docs"));
        store.insert("rcas/empty.txt", b"  \n\n ".to_vec());
        let index = Arc::new(InMemoryIndex::new());

        let report = run_ingest(&run(1), store, destination(&index)).await.unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.chunks_for("rcas/empty.txt"), Some(0));
        assert_eq!(index.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn bad_glob_is_fatal() {
        let store = Arc::new(InMemoryObjectStore::new("rca-docs"));
        let mut run = run(1);
        run.include_globs = vec!["[".to_string()];
        assert!(run_ingest(&run, store, Destination::DryRun).await.is_err());
    }
}
