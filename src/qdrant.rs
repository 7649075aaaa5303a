//! Vector index abstraction and the Qdrant REST client.
//!
//! The pipeline talks to the index only through [`VectorIndex`]: list
//! collections, read a collection's vector parameters, create a collection,
//! and upsert points. [`QdrantIndex`] implements it over Qdrant's HTTP API
//! with `reqwest`; tests use [`InMemoryIndex`](crate::memory::InMemoryIndex).
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | list | `GET /collections` |
//! | info | `GET /collections/{name}` |
//! | create | `PUT /collections/{name}` |
//! | upsert | `PUT /collections/{name}/points?wait=true` |
//!
//! The API key, when configured, is sent in the `api-key` header.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::QdrantConfig;
use crate::error::HttpStatusError;
use crate::models::ChunkId;

/// Similarity metric of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    #[serde(alias = "cosine")]
    Cosine,
    #[serde(alias = "dot")]
    Dot,
    #[serde(alias = "euclid")]
    Euclid,
    #[serde(alias = "manhattan")]
    Manhattan,
}

/// Vector configuration of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorParams {
    pub size: u64,
    pub distance: Distance,
}

/// One entry to write: ID, embedding, and JSON payload.
#[derive(Debug, Clone, Serialize)]
pub struct IndexPoint {
    pub id: ChunkId,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// Operations the pipeline needs from a vector index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Names of all existing collections.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Vector parameters of an existing collection.
    ///
    /// `Ok(None)` when the collection uses a layout this crate does not
    /// write to (e.g. only named vectors).
    async fn collection_params(&self, name: &str) -> Result<Option<VectorParams>>;

    /// Create a collection with a single unnamed vector.
    async fn create_collection(&self, name: &str, params: VectorParams) -> Result<()>;

    /// Insert or overwrite points by ID in one request.
    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<()>;
}

/// Qdrant HTTP client.
pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
}

impl QdrantIndex {
    /// Build a client from configuration.
    ///
    /// The API key comes from `qdrant.api_key` or, failing that, the
    /// `QDRANT_API_KEY` environment variable.
    pub fn new(config: &QdrantConfig) -> Result<Self> {
        anyhow::ensure!(
            config.url.starts_with("http://") || config.url.starts_with("https://"),
            "Qdrant URL must be an http(s) URL, got '{}'",
            config.url
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("QDRANT_API_KEY").ok());
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            headers.insert(
                "api-key",
                HeaderValue::from_str(key.trim()).context("invalid Qdrant API key")?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build Qdrant HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.base_url, name)
    }
}

/// Turn a non-success response into an [`HttpStatusError`].
async fn check_status(resp: reqwest::Response, service: &'static str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(HttpStatusError::new(service, status.as_u16(), &body).into())
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/collections", self.base_url))
            .send()
            .await
            .with_context(|| format!("Failed to reach Qdrant at {}", self.base_url))?;
        let json: Value = check_status(resp, "Qdrant list collections")
            .await?
            .json()
            .await?;
        parse_collection_names(&json)
    }

    async fn collection_params(&self, name: &str) -> Result<Option<VectorParams>> {
        let resp = self
            .client
            .get(self.collection_url(name))
            .send()
            .await
            .with_context(|| format!("Failed to fetch Qdrant collection '{}'", name))?;
        let json: Value = check_status(resp, "Qdrant collection info")
            .await?
            .json()
            .await?;
        parse_vector_params(&json)
    }

    async fn create_collection(&self, name: &str, params: VectorParams) -> Result<()> {
        let body = serde_json::json!({ "vectors": params });
        let resp = self
            .client
            .put(self.collection_url(name))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to create Qdrant collection '{}'", name))?;
        check_status(resp, "Qdrant create collection").await?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({ "points": points });
        let resp = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(collection)))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to upsert into Qdrant collection '{}'", collection))?;
        check_status(resp, "Qdrant upsert").await?;
        Ok(())
    }
}

/// Extract `result.collections[].name` from a list response.
fn parse_collection_names(json: &Value) -> Result<Vec<String>> {
    let collections = json
        .pointer("/result/collections")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result.collections"))?;

    Ok(collections
        .iter()
        .filter_map(|c| c.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
        .collect())
}

/// Extract the unnamed vector config from a collection info response.
fn parse_vector_params(json: &Value) -> Result<Option<VectorParams>> {
    let vectors = json
        .pointer("/result/config/params/vectors")
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result.config.params.vectors"))?;

    if vectors.get("size").is_none() {
        return Ok(None);
    }
    let params: VectorParams = serde_json::from_value(vectors.clone())
        .context("Invalid Qdrant response: unreadable vector params")?;
    Ok(Some(params))
}
