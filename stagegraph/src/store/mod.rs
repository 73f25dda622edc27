//! Content-addressed artifact storage.
//!
//! Stages hand artifacts to their dependents through an [`ArtifactStore`].
//! Content is stored once per SHA-256 digest; a named key is a ref pointing
//! at a digest. Writing a key again publishes a new version of the ref, it
//! never mutates stored content in place.

mod config;
mod fs;
mod memory;

pub use config::StoreConfig;
pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::ArtifactMeta;
use crate::errors::StoreError;

/// Storage backend for stage artifacts.
///
/// A `put` is atomic from a reader's point of view: `get` returns either the
/// previous version or the complete new one.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes `data` under `key` and returns the new version's metadata.
    async fn put(&self, key: &str, data: Bytes) -> Result<ArtifactMeta, StoreError>;

    /// Reads the latest version of `key`.
    ///
    /// Returns `StoreError::NotFound` if the key was never written or was deleted.
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Gets metadata without reading content.
    async fn head(&self, key: &str) -> Result<Option<ArtifactMeta>, StoreError>;

    /// Removes `key`. Succeeds even if the key does not exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Lists the latest version of every key starting with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactMeta>, StoreError>;
}

/// Rejects keys that cannot be mapped safely onto every backend.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.starts_with('/') {
        Some("key must be relative")
    } else if key.contains('\\') || key.contains('\0') {
        Some("key contains a forbidden character")
    } else if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        Some("key contains an empty or relative segment")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
