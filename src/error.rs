//! Typed errors for the places where callers branch on the failure kind.
//!
//! Everything else flows through `anyhow::Result` with context attached.
//! The orchestrator converts any per-object error into an [`ObjectFailure`]
//! tagged with the [`Stage`] that produced it.

use std::fmt;

use thiserror::Error;

/// A non-success HTTP response from S3 or Qdrant.
#[derive(Debug, Error)]
#[error("{service} returned HTTP {status}: {body}")]
pub struct HttpStatusError {
    /// Short service label (`"S3 GetObject"`, `"Qdrant upsert"`, ...).
    pub service: &'static str,
    pub status: u16,
    /// Response body, truncated to 500 characters.
    pub body: String,
}

impl HttpStatusError {
    pub fn new(service: &'static str, status: u16, body: &str) -> Self {
        Self {
            service,
            status,
            body: body.chars().take(500).collect(),
        }
    }

    /// Rate limiting and server-side errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        self.status == 429 || (500..600).contains(&self.status)
    }
}

/// Text extraction failure. The pipeline skips the object; it never panics.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("unsupported document: {0}")]
    Unsupported(&'static str),
    #[error("file is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("failed to read staged file: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-object pipeline stage at which a recoverable failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Download or metadata lookup.
    Stage,
    /// Text extraction.
    Decode,
    /// Embedding or index write.
    Upsert,
    /// The worker task processing the object panicked.
    Worker,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Stage => "download",
            Stage::Decode => "decode",
            Stage::Upsert => "upsert",
            Stage::Worker => "worker",
        };
        f.write_str(label)
    }
}

/// A recoverable failure for one source object.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed for {key}: {message}")]
pub struct ObjectFailure {
    pub key: String,
    pub stage: Stage,
    /// Rendered error chain (`{:#}` of the underlying `anyhow::Error`).
    pub message: String,
}

impl ObjectFailure {
    pub fn new(key: &str, stage: Stage, err: &anyhow::Error) -> Self {
        Self {
            key: key.to_string(),
            stage,
            message: format!("{:#}", err),
        }
    }
}
