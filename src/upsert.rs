//! Writes one object's chunks to the vector index.
//!
//! In dry-run mode nothing leaves the process: the writer reports how many
//! chunks would be written and prints the first few identifiers. Otherwise
//! chunk texts are embedded in batches and all points of the object are sent
//! in a single upsert keyed by chunk ID, so a failure surfaces as an error
//! for the whole object. Qdrant rejects request bodies over its configured
//! limit (32 MB by default); with
//! [`with_max_points_per_request`](UpsertWriter::with_max_points_per_request)
//! the points are split across several requests instead, and a failure part
//! way through leaves the earlier groups written.
//!
//! Each point's payload follows the `page_content` / `metadata` layout the
//! query side reads:
//!
//! ```json
//! {
//!   "page_content": "...chunk text...",
//!   "metadata": {
//!     "s3_key": "rcas/incident-42.log",
//!     "bucket": "rca-docs",
//!     "filename": "incident-42.log",
//!     "chunk_index": 0,
//!     "s3_last_modified": "2024-03-05T10:15:00+00:00",
//!     "s3_size": 1000,
//!     "s3_etag": "0123abcd"
//!   }
//! }
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;

use crate::config::RetryConfig;
use crate::embedding::EmbeddingProvider;
use crate::models::{Chunk, ChunkMetadata};
use crate::qdrant::{IndexPoint, VectorIndex};
use crate::retry::retry_transient;

/// Identifiers shown per object in dry-run output.
const DRY_RUN_PREVIEW: usize = 3;

enum Target {
    DryRun,
    Index {
        index: Arc<dyn VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
    },
}

/// Destination for chunk batches.
pub struct UpsertWriter {
    target: Target,
    collection: String,
    batch_size: usize,
    max_points_per_request: Option<usize>,
    retry: RetryConfig,
}

impl UpsertWriter {
    /// Writer that embeds with `provider` and upserts into `collection`.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        collection: &str,
        batch_size: usize,
        retry: RetryConfig,
    ) -> Self {
        Self {
            target: Target::Index { index, provider },
            collection: collection.to_string(),
            batch_size: batch_size.max(1),
            max_points_per_request: None,
            retry,
        }
    }

    /// Cap the number of points sent in one upsert request.
    pub fn with_max_points_per_request(mut self, max: Option<usize>) -> Self {
        self.max_points_per_request = max.map(|n| n.max(1));
        self
    }

    /// Writer that computes identifiers and counts only.
    pub fn dry_run(collection: &str) -> Self {
        Self {
            target: Target::DryRun,
            collection: collection.to_string(),
            batch_size: 1,
            max_points_per_request: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self.target, Target::DryRun)
    }

    /// Write `chunks` of one object; returns the number written (or that
    /// would be written in dry-run mode).
    pub async fn write(&self, metadata: &ChunkMetadata, chunks: &[Chunk]) -> Result<usize> {
        let (index, provider) = match &self.target {
            Target::DryRun => {
                let preview: Vec<String> = chunks
                    .iter()
                    .take(DRY_RUN_PREVIEW)
                    .map(|c| c.id.to_string())
                    .collect();
                println!(
                    "  [dry-run] would upsert {} chunks into '{}'; first ids: [{}]",
                    chunks.len(),
                    self.collection,
                    preview.join(", ")
                );
                return Ok(chunks.len());
            }
            Target::Index { index, provider } => (index, provider),
        };

        if chunks.is_empty() {
            return Ok(0);
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = provider
                .embed(&texts)
                .await
                .with_context(|| format!("Embedding failed for {}", metadata.s3_key))?;
            if embedded.len() != batch.len() {
                bail!(
                    "Embedding provider returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                );
            }
            vectors.extend(embedded);
        }

        let dims = provider.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                dims,
                bad.len()
            );
        }

        let points: Vec<IndexPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexPoint {
                id: chunk.id,
                vector,
                payload: chunk_payload(metadata, chunk),
            })
            .collect();

        let count = points.len();
        let group_size = self.max_points_per_request.unwrap_or(count);
        for group in points.chunks(group_size) {
            retry_transient(&self.retry, "upsert", || {
                index.upsert(&self.collection, group.to_vec())
            })
            .await
            .with_context(|| {
                format!(
                    "Failed to upsert {} chunks of {} into '{}'",
                    count, metadata.s3_key, self.collection
                )
            })?;
        }

        tracing::debug!(key = %metadata.s3_key, chunks = count, "upserted");
        Ok(count)
    }
}

/// Payload stored with each point.
pub fn chunk_payload(metadata: &ChunkMetadata, chunk: &Chunk) -> serde_json::Value {
    let mut meta = serde_json::to_value(metadata).unwrap_or_else(|_| json!({}));
    if let Some(map) = meta.as_object_mut() {
        map.insert("chunk_index".to_string(), json!(chunk.chunk_index));
    }
    json!({
        "page_content": chunk.text,
        "metadata": meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use crate::memory::{HashingEmbedder, InMemoryIndex};
    use crate::models::ObjectMetadata;
    use crate::qdrant::{Distance, VectorParams};

    fn metadata(key: &str) -> ChunkMetadata {
        ChunkMetadata::for_object(
            "rca-docs",
            "incident-42.log",
            &ObjectMetadata {
                key: key.to_string(),
                size: Some(11),
                last_modified: None,
                etag: Some("0123abcd".to_string()),
            },
        )
    }

    fn chunks(key: &str, n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                id: chunk_id(key, i),
                chunk_index: i,
                text: format!("chunk {} of {}", i, key),
                start: i * 10,
                end: i * 10 + 10,
            })
            .collect()
    }

    async fn index_with_collection(dims: u64) -> Arc<InMemoryIndex> {
        let index = Arc::new(InMemoryIndex::new());
        index
            .create_collection(
                "incidents",
                VectorParams {
                    size: dims,
                    distance: Distance::Cosine,
                },
            )
            .await
            .unwrap();
        index
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
        }
    }

    #[test]
    fn payload_layout() {
        let key = "rcas/incident-42.log";
        let chunk = &chunks(key, 2)[1];
        let payload = chunk_payload(&metadata(key), chunk);
        assert_eq!(payload["page_content"], "chunk 1 of rcas/incident-42.log");
        assert_eq!(payload["metadata"]["s3_key"], key);
        assert_eq!(payload["metadata"]["filename"], "incident-42.log");
        assert_eq!(payload["metadata"]["chunk_index"], 1);
        assert_eq!(payload["metadata"]["s3_size"], 11);
        assert_eq!(payload["metadata"]["s3_etag"], "0123abcd");
    }

    #[tokio::test]
    async fn dry_run_counts_without_writing() {
        let writer = UpsertWriter::dry_run("incidents");
        let n = writer.write(&metadata("a.log"), &chunks("a.log", 5)).await.unwrap();
        assert_eq!(n, 5);
        assert!(writer.is_dry_run());
    }

    #[tokio::test]
    async fn writes_all_chunks_in_one_upsert() {
        let index = index_with_collection(16).await;
        let embedder = Arc::new(HashingEmbedder::new(16));
        let writer = UpsertWriter::new(index.clone(), embedder.clone(), "incidents", 2, fast_retry());

        let n = writer.write(&metadata("a.log"), &chunks("a.log", 5)).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(index.len("incidents"), 5);
        assert_eq!(index.upsert_calls(), 1);
        assert_eq!(embedder.calls(), 3);
    }

    #[tokio::test]
    async fn points_split_across_capped_requests() {
        let index = index_with_collection(16).await;
        let writer = UpsertWriter::new(
            index.clone(),
            Arc::new(HashingEmbedder::new(16)),
            "incidents",
            8,
            fast_retry(),
        )
        .with_max_points_per_request(Some(2));

        let n = writer.write(&metadata("a.log"), &chunks("a.log", 5)).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(index.len("incidents"), 5);
        assert_eq!(index.upsert_calls(), 3);
    }

    #[tokio::test]
    async fn empty_chunk_list_skips_index() {
        let index = index_with_collection(16).await;
        let writer = UpsertWriter::new(
            index.clone(),
            Arc::new(HashingEmbedder::new(16)),
            "incidents",
            8,
            fast_retry(),
        );
        assert_eq!(writer.write(&metadata("a.log"), &[]).await.unwrap(), 0);
        assert_eq!(index.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn upsert_failure_is_error_and_writes_nothing() {
        let index = index_with_collection(16).await;
        index.fail_upserts_for("a.log");
        let writer = UpsertWriter::new(
            index.clone(),
            Arc::new(HashingEmbedder::new(16)),
            "incidents",
            8,
            fast_retry(),
        );
        let err = writer.write(&metadata("a.log"), &chunks("a.log", 3)).await.unwrap_err();
        assert!(format!("{:#}", err).contains("simulated upsert failure"));
        assert_eq!(index.len("incidents"), 0);
    }
}
