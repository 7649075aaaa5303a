//! Core data models that flow through the ingestion pipeline.
//!
//! A [`SourceObject`] comes out of the bucket listing, gets staged and
//! enriched with [`ObjectMetadata`], and is turned into [`Chunk`]s that are
//! embedded and written to the vector index.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One remote object as reported by the bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceObject {
    /// Full object key (path within the bucket).
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag, stripped of surrounding quotes. Descriptive only.
    pub etag: String,
}

/// Metadata returned by a `HEAD` on a staged object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Deterministic, content-addressed chunk identifier.
///
/// Rendered as a UUID so it is a valid Qdrant point ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub Uuid);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl Serialize for ChunkId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A window of decoded text ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    /// Zero-based position within the source document.
    pub chunk_index: usize,
    pub text: String,
    /// Character offset of the window start in the decoded text.
    pub start: usize,
    /// Character offset one past the window end.
    pub end: usize,
}

/// Metadata stored alongside every chunk of one source object.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMetadata {
    pub s3_key: String,
    pub bucket: String,
    pub filename: String,
    pub s3_last_modified: Option<String>,
    pub s3_size: Option<u64>,
    pub s3_etag: Option<String>,
}

impl ChunkMetadata {
    /// Build the shared metadata for a staged object.
    pub fn for_object(bucket: &str, filename: &str, meta: &ObjectMetadata) -> Self {
        Self {
            s3_key: meta.key.clone(),
            bucket: bucket.to_string(),
            filename: filename.to_string(),
            s3_last_modified: meta.last_modified.map(|dt| dt.to_rfc3339()),
            s3_size: meta.size,
            s3_etag: meta.etag.clone(),
        }
    }
}
