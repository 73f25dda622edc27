//! In-memory artifact store.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{validate_key, ArtifactStore};
use crate::core::{content_digest, ArtifactMeta};
use crate::errors::StoreError;
use crate::utils::now_utc;

/// In-memory content-addressed store.
///
/// Thread-safe via `DashMap`. Blobs are kept until [`gc`](Self::gc) drops the
/// ones no ref points at any more.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    blobs: DashMap<String, Bytes>,
    refs: DashMap<String, ArtifactMeta>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of distinct blobs held.
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns true if no key is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Drops blobs that no ref points at; returns how many were removed.
    pub fn gc(&self) -> usize {
        let live: std::collections::HashSet<String> =
            self.refs.iter().map(|r| r.value().digest.clone()).collect();
        let before = self.blobs.len();
        self.blobs.retain(|digest, _| live.contains(digest));
        before - self.blobs.len()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<ArtifactMeta, StoreError> {
        validate_key(key)?;

        let digest = content_digest(&data);
        let size = data.len() as u64;
        // Blob first, ref second: a reader that sees the new ref always finds its blob.
        self.blobs.entry(digest.clone()).or_insert(data);

        let mut entry = self.refs.entry(key.to_string()).or_insert_with(|| ArtifactMeta {
            key: key.to_string(),
            digest: digest.clone(),
            size,
            version: 0,
            created_at: now_utc(),
        });
        let meta = entry.value_mut();
        meta.version += 1;
        meta.digest = digest;
        meta.size = size;
        meta.created_at = now_utc();

        Ok(meta.clone())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        validate_key(key)?;

        let digest = self
            .refs
            .get(key)
            .map(|r| r.value().digest.clone())
            .ok_or_else(|| StoreError::not_found(key))?;

        self.blobs
            .get(&digest)
            .map(|b| b.value().clone())
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn head(&self, key: &str) -> Result<Option<ArtifactMeta>, StoreError> {
        validate_key(key)?;
        Ok(self.refs.get(key).map(|r| r.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.refs.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactMeta>, StoreError> {
        let mut metas: Vec<ArtifactMeta> = self
            .refs
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| r.value().clone())
            .collect();
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }
}
