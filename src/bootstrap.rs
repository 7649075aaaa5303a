//! One-time collection bootstrap.
//!
//! Runs before any object is processed. Creates the destination collection
//! when it is missing; when it exists, either trusts it or checks that its
//! vector size and distance match what the embedding provider produces.
//! Any failure here is fatal to the run.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::qdrant::{VectorIndex, VectorParams};

/// How to treat a collection that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaPolicy {
    /// Use it as-is without inspecting its configuration.
    Trust,
    /// Fail unless its vector size and distance match.
    Validate,
}

/// What [`ensure_collection`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Created,
    Existing,
}

/// Make sure `name` exists with `expected` vector params.
pub async fn ensure_collection(
    index: &dyn VectorIndex,
    name: &str,
    expected: VectorParams,
    policy: SchemaPolicy,
) -> Result<BootstrapOutcome> {
    let existing = index
        .list_collections()
        .await
        .context("Failed to list vector index collections")?;

    if !existing.iter().any(|c| c == name) {
        tracing::info!(
            collection = name,
            size = expected.size,
            distance = ?expected.distance,
            "creating collection"
        );
        index
            .create_collection(name, expected)
            .await
            .with_context(|| format!("Failed to create collection '{}'", name))?;
        return Ok(BootstrapOutcome::Created);
    }

    if policy == SchemaPolicy::Validate {
        let actual = index
            .collection_params(name)
            .await
            .with_context(|| format!("Failed to read configuration of collection '{}'", name))?;
        match actual {
            Some(actual) if actual == expected => {}
            Some(actual) => bail!(
                "Collection '{}' has vectors of size {} ({:?}) but the embedding provider \
                 produces size {} ({:?})",
                name,
                actual.size,
                actual.distance,
                expected.size,
                expected.distance
            ),
            None => bail!(
                "Collection '{}' does not use a single unnamed vector; cannot write to it",
                name
            ),
        }
    }

    tracing::info!(collection = name, "collection already exists");
    Ok(BootstrapOutcome::Existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIndex;
    use crate::qdrant::Distance;

    fn params(size: u64) -> VectorParams {
        VectorParams {
            size,
            distance: Distance::Cosine,
        }
    }

    #[tokio::test]
    async fn creates_missing_collection() {
        let index = InMemoryIndex::new();
        let outcome = ensure_collection(&index, "incidents", params(384), SchemaPolicy::Validate)
            .await
            .unwrap();
        assert_eq!(outcome, BootstrapOutcome::Created);
        assert_eq!(index.params("incidents"), Some(params(384)));
    }

    #[tokio::test]
    async fn leaves_matching_collection_alone() {
        let index = InMemoryIndex::new();
        index.create_collection("incidents", params(384)).await.unwrap();
        let outcome = ensure_collection(&index, "incidents", params(384), SchemaPolicy::Validate)
            .await
            .unwrap();
        assert_eq!(outcome, BootstrapOutcome::Existing);
        assert_eq!(index.create_calls(), 1);
    }

    #[tokio::test]
    async fn validate_rejects_dimension_mismatch() {
        let index = InMemoryIndex::new();
        index.create_collection("incidents", params(768)).await.unwrap();
        let err = ensure_collection(&index, "incidents", params(384), SchemaPolicy::Validate)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("size 768"));
    }

    #[tokio::test]
    async fn trust_accepts_mismatch() {
        let index = InMemoryIndex::new();
        index.create_collection("incidents", params(768)).await.unwrap();
        let outcome = ensure_collection(&index, "incidents", params(384), SchemaPolicy::Trust)
            .await
            .unwrap();
        assert_eq!(outcome, BootstrapOutcome::Existing);
    }

    #[tokio::test]
    async fn create_failure_is_error() {
        let index = InMemoryIndex::new();
        index.fail_creates();
        assert!(
            ensure_collection(&index, "incidents", params(384), SchemaPolicy::Trust)
                .await
                .is_err()
        );
    }
}
