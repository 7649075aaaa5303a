//! In-memory implementations of the pipeline's collaborators.
//!
//! [`InMemoryObjectStore`], [`InMemoryIndex`] and [`HashingEmbedder`] stand
//! in for S3, Qdrant and a real embedding model in tests and offline runs.
//! State lives in `HashMap`/`BTreeMap`s behind `std::sync::RwLock`; each
//! double can be told to fail specific calls.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::connector_s3::{ListPage, ObjectStore};
use crate::embedding::EmbeddingProvider;
use crate::models::{ChunkId, ObjectMetadata, SourceObject};
use crate::qdrant::{IndexPoint, VectorIndex, VectorParams};

// ============ Object store ============

struct StoredObject {
    bytes: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Bucket held in memory, listed in key order.
pub struct InMemoryObjectStore {
    bucket: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    page_size: usize,
    fail_listing: AtomicBool,
    failing_downloads: RwLock<HashSet<String>>,
    list_calls: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: RwLock::new(BTreeMap::new()),
            page_size: 1000,
            fail_listing: AtomicBool::new(false),
            failing_downloads: RwLock::new(HashSet::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Return at most `page_size` keys per listing call.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add or replace an object. Keys ending in `/` act as directory markers.
    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        let last_modified = Utc
            .with_ymd_and_hms(2024, 3, 5, 10, 15, 0)
            .single()
            .unwrap_or_default();
        self.objects.write().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes,
                last_modified,
            },
        );
    }

    /// Make every subsequent listing call fail.
    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    /// Make downloads of `key` fail after writing a partial file.
    pub fn fail_download(&self, key: &str) {
        self.failing_downloads.write().unwrap().insert(key.to_string());
    }

    /// Number of `list_page` calls made so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn etag(bytes: &[u8]) -> String {
        hex::encode(&Sha256::digest(bytes)[..16])
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            bail!("simulated listing failure: access denied");
        }

        let objects = self.objects.read().unwrap();
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.map(|after| key.as_str() > after).unwrap_or(true));

        let page: Vec<SourceObject> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, obj)| SourceObject {
                key: key.clone(),
                size: obj.bytes.len() as u64,
                last_modified: Some(obj.last_modified),
                etag: Self::etag(&obj.bytes),
            })
            .collect();

        let next_token = if matching.next().is_some() {
            page.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects: page,
            next_token,
        })
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMetadata> {
        let objects = self.objects.read().unwrap();
        let obj = objects
            .get(key)
            .ok_or_else(|| anyhow!("no such key: {}", key))?;
        Ok(ObjectMetadata {
            key: key.to_string(),
            size: Some(obj.bytes.len() as u64),
            last_modified: Some(obj.last_modified),
            etag: Some(Self::etag(&obj.bytes)),
        })
    }

    async fn download_to(&self, key: &str, dest: &Path) -> Result<u64> {
        let bytes = {
            let objects = self.objects.read().unwrap();
            objects
                .get(key)
                .map(|o| o.bytes.clone())
                .ok_or_else(|| anyhow!("no such key: {}", key))?
        };

        let fail = self.failing_downloads.read().unwrap().contains(key);
        if fail {
            let half = &bytes[..bytes.len() / 2];
            tokio::fs::write(dest, half).await?;
            bail!("simulated connection reset while downloading {}", key);
        }

        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}

// ============ Vector index ============

struct Collection {
    params: VectorParams,
    points: BTreeMap<ChunkId, IndexPoint>,
}

/// Vector index held in memory. Upserts overwrite by point ID.
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
    create_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
    fail_creates: AtomicBool,
    failing_keys: RwLock<HashSet<String>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
            fail_creates: AtomicBool::new(false),
            failing_keys: RwLock::new(HashSet::new()),
        }
    }

    /// Vector params of `collection`, if it exists.
    pub fn params(&self, collection: &str) -> Option<VectorParams> {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map(|c| c.params)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Make collection creation fail.
    pub fn fail_creates(&self) {
        self.fail_creates.store(true, Ordering::SeqCst);
    }

    /// Reject upserts carrying points whose `metadata.s3_key` is `key`.
    pub fn fail_upserts_for(&self, key: &str) {
        self.failing_keys.write().unwrap().insert(key.to_string());
    }

    /// Number of points in `collection` (0 when it does not exist).
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }

    pub fn point(&self, collection: &str, id: ChunkId) -> Option<IndexPoint> {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .and_then(|c| c.points.get(&id).cloned())
    }

    /// IDs of all points whose payload names `key` as their source.
    pub fn ids_for_key(&self, collection: &str, key: &str) -> BTreeSet<ChunkId> {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map(|c| {
                c.points
                    .iter()
                    .filter(|(_, p)| payload_key(p) == Some(key))
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count_for_key(&self, collection: &str, key: &str) -> usize {
        self.ids_for_key(collection, key).len()
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn payload_key(point: &IndexPoint) -> Option<&str> {
    point.payload.pointer("/metadata/s3_key").and_then(|v| v.as_str())
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().unwrap().keys().cloned().collect())
    }

    async fn collection_params(&self, name: &str) -> Result<Option<VectorParams>> {
        self.params(name)
            .map(Some)
            .ok_or_else(|| anyhow!("collection '{}' not found", name))
    }

    async fn create_collection(&self, name: &str, params: VectorParams) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            bail!("simulated create failure for collection '{}'", name);
        }
        let mut collections = self.collections.write().unwrap();
        if collections.contains_key(name) {
            bail!("collection '{}' already exists", name);
        }
        collections.insert(
            name.to_string(),
            Collection {
                params,
                points: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        {
            let failing = self.failing_keys.read().unwrap();
            if let Some(key) = points
                .iter()
                .filter_map(payload_key)
                .find(|k| failing.contains(*k))
            {
                bail!("simulated upsert failure for {}", key);
            }
        }

        let mut collections = self.collections.write().unwrap();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection '{}' not found", collection))?;
        let expected = target.params.size as usize;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != expected) {
            bail!(
                "wrong vector dimension for point {}: expected {}, got {}",
                bad.id,
                expected,
                bad.vector.len()
            );
        }
        for point in points {
            target.points.insert(point.id, point);
        }
        Ok(())
    }
}

// ============ Embedder ============

/// Deterministic embedder that hashes text into a unit vector.
///
/// Identical texts always map to identical vectors; no model is loaded.
pub struct HashingEmbedder {
    dims: usize,
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let raw: Vec<f32> = (0..self.dims)
            .map(|i| digest[i % digest.len()] as f32 - 127.5)
            .collect();
        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            return raw;
        }
        raw.into_iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}
