//! Configuration for an ingestion run.
//!
//! Settings come from three layers, lowest precedence first: built-in
//! defaults (some read from the environment), an optional TOML file passed
//! with `--config`, and command-line flags applied by the binary.
//!
//! ```toml
//! [s3]
//! region = "eu-west-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! include_globs = ["**/*.md", "**/*.pdf"]
//!
//! [qdrant]
//! url = "http://localhost:6333"
//! distance = "Cosine"
//! schema_policy = "validate"
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [chunking]
//! chunk_size = 800
//! chunk_overlap = 100
//!
//! [ingest]
//! collection = "incidents"
//! workers = 4
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::bootstrap::SchemaPolicy;
use crate::qdrant::Distance;

pub const DEFAULT_COLLECTION: &str = "incidents";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub s3: S3Config,
    pub qdrant: QdrantConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack).
    /// Switches requests to path-style addressing.
    pub endpoint_url: Option<String>,
    /// Globs matched against the key relative to the prefix. Empty = all.
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Page size for `ListObjectsV2`.
    pub max_keys: u32,
    pub timeout_secs: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: std::env::var("AWS_ENDPOINT_URL").ok(),
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            max_keys: 1000,
            timeout_secs: 60,
        }
    }
}

fn default_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-1".to_string())
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    /// Falls back to `QDRANT_API_KEY` when unset.
    pub api_key: Option<String>,
    pub distance: Distance,
    pub schema_policy: SchemaPolicy,
    pub timeout_secs: u64,
    /// Split an object's points over several upsert requests of at most
    /// this many points. Unset sends each object in one request.
    pub max_points_per_request: Option<usize>,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("QDRANT_URL").unwrap_or_else(|_| DEFAULT_QDRANT_URL.to_string()),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
            distance: Distance::Cosine,
            schema_policy: SchemaPolicy::Validate,
            timeout_secs: 30,
            max_points_per_request: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// One of `local`, `openai`, `ollama`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    pub url: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    /// Model name, defaulting to the provider's usual choice.
    pub fn model_name(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.provider.as_str() {
            "openai" => "text-embedding-3-small".to_string(),
            "ollama" => "nomic-embed-text".to_string(),
            _ => "all-minilm-l6-v2".to_string(),
        })
    }

    /// Vector dimensionality: explicit `dims`, else the known size of the model.
    pub fn resolved_dims(&self) -> usize {
        self.dims.unwrap_or_else(|| match self.model_name().as_str() {
            "all-minilm-l6-v2" | "bge-small-en-v1.5" | "multilingual-e5-small" => 384,
            "bge-base-en-v1.5" | "multilingual-e5-base" => 768,
            "nomic-embed-text" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
            "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
            "text-embedding-3-large" => 3072,
            _ => 384,
        })
    }
}

/// Window size and overlap, both measured in characters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub collection: String,
    /// Objects processed concurrently. `1` is strictly sequential.
    pub workers: usize,
    pub retry: RetryConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            workers: 1,
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff for transient transport errors at the download and upsert steps.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Config {
    /// Check cross-field invariants. Called after every layer is applied.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.ingest.workers == 0 {
            bail!("ingest.workers must be >= 1");
        }
        if self.ingest.retry.max_attempts == 0 {
            bail!("ingest.retry.max_attempts must be >= 1");
        }
        if self.ingest.collection.trim().is_empty() {
            bail!("ingest.collection must not be empty");
        }
        if self.s3.max_keys == 0 || self.s3.max_keys > 1000 {
            bail!("s3.max_keys must be in 1..=1000");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.qdrant.max_points_per_request == Some(0) {
            bail!("qdrant.max_points_per_request must be > 0");
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }

        match self.embedding.provider.as_str() {
            "local" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
                other
            ),
        }

        Ok(())
    }
}

/// Read configuration from an optional TOML file without validating it.
///
/// Without a path every setting takes its default. Callers that layer
/// further overrides on top must call [`Config::validate`] afterwards.
pub fn read_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")
        }
        None => Ok(Config::default()),
    }
}

/// Load configuration from an optional TOML file and validate it.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = read_config(path)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.ingest.collection, "incidents");
        assert_eq!(config.ingest.workers, 1);
        assert_eq!(config.embedding.resolved_dims(), 384);
        assert_eq!(config.qdrant.distance, Distance::Cosine);
        assert_eq!(config.qdrant.schema_policy, SchemaPolicy::Validate);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
[chunking]
chunk_size = 400

[ingest]
workers = 4

[qdrant]
distance = "Dot"
schema_policy = "trust"
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 400);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.ingest.workers, 4);
        assert_eq!(config.qdrant.distance, Distance::Dot);
        assert_eq!(config.qdrant.schema_policy, SchemaPolicy::Trust);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = parse("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(parse("[ingest]\nworkers = 0\n").is_err());
    }

    #[test]
    fn points_per_request_cap() {
        let config = parse("[qdrant]\nmax_points_per_request = 128\n").unwrap();
        assert_eq!(config.qdrant.max_points_per_request, Some(128));
        assert!(parse("[qdrant]\nmax_points_per_request = 0\n").is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse("[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn dims_follow_model() {
        let mut config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..EmbeddingConfig::default()
        };
        assert_eq!(config.model_name(), "text-embedding-3-small");
        assert_eq!(config.resolved_dims(), 1536);
        config.dims = Some(512);
        assert_eq!(config.resolved_dims(), 512);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/rca-ingest.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
