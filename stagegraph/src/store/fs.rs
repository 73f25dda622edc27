//! Filesystem artifact store.
//!
//! Layout under `<root>/<bucket>/`:
//!
//! ```text
//! blobs/<sha256>        content, written once
//! refs/<key>.json       ArtifactMeta of the latest version of <key>
//! ```
//!
//! Every file is written to a temporary name in the same directory and then
//! renamed into place, so readers never observe a partial write.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{validate_key, ArtifactStore, StoreConfig};
use crate::core::{content_digest, ArtifactMeta};
use crate::errors::StoreError;
use crate::utils::{generate_uuid, now_utc};

const REF_SUFFIX: &str = ".json";

/// Content-addressed store on a local (or mounted) filesystem.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    config: StoreConfig,
    blobs_dir: PathBuf,
    refs_dir: PathBuf,
}

impl FsArtifactStore {
    /// Opens (creating if needed) the store described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directories cannot be created.
    pub async fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let bucket = config.bucket_dir();
        let blobs_dir = bucket.join("blobs");
        let refs_dir = bucket.join("refs");
        fs::create_dir_all(&blobs_dir).await?;
        fs::create_dir_all(&refs_dir).await?;

        tracing::debug!(bucket = %bucket.display(), "Opened filesystem artifact store");

        Ok(Self {
            config,
            blobs_dir,
            refs_dir,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.blobs_dir.join(digest)
    }

    fn ref_path(&self, key: &str) -> PathBuf {
        self.refs_dir.join(format!("{key}{REF_SUFFIX}"))
    }

    async fn read_ref(&self, key: &str) -> Result<Option<ArtifactMeta>, StoreError> {
        match fs::read(self.ref_path(key)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes blobs no ref points at; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the directories cannot be read.
    pub async fn gc(&self) -> Result<usize, StoreError> {
        let live: std::collections::HashSet<String> =
            self.list("").await?.into_iter().map(|m| m.digest).collect();

        let mut removed = 0;
        let mut entries = fs::read_dir(&self.blobs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !live.contains(&name) {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Writes `data` to `path` via a sibling temp file and a rename.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", generate_uuid().simple()));
    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<ArtifactMeta, StoreError> {
        validate_key(key)?;

        let digest = content_digest(&data);
        let blob = self.blob_path(&digest);
        if !fs::try_exists(&blob).await? {
            write_atomic(&blob, &data).await?;
        }

        let version = self.read_ref(key).await?.map_or(1, |m| m.version + 1);
        let meta = ArtifactMeta {
            key: key.to_string(),
            digest,
            size: data.len() as u64,
            version,
            created_at: now_utc(),
        };
        write_atomic(&self.ref_path(key), &serde_json::to_vec_pretty(&meta)?).await?;

        tracing::trace!(key = %key, version, "Artifact written");
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        validate_key(key)?;

        let meta = self
            .read_ref(key)
            .await?
            .ok_or_else(|| StoreError::not_found(key))?;

        let data = match fs::read(self.blob_path(&meta.digest)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::not_found(key))
            }
            Err(e) => return Err(e.into()),
        };

        let actual = content_digest(&data);
        if actual != meta.digest {
            return Err(StoreError::Corrupt {
                key: key.to_string(),
                expected: meta.digest,
                actual,
            });
        }

        Ok(Bytes::from(data))
    }

    async fn head(&self, key: &str) -> Result<Option<ArtifactMeta>, StoreError> {
        validate_key(key)?;
        self.read_ref(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        match fs::remove_file(self.ref_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactMeta>, StoreError> {
        let mut metas = Vec::new();
        let mut pending = vec![self.refs_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') || !name.ends_with(REF_SUFFIX) {
                    continue;
                }
                let raw = fs::read(&path).await?;
                let meta: ArtifactMeta = serde_json::from_slice(&raw)?;
                if meta.key.starts_with(prefix) {
                    metas.push(meta);
                }
            }
        }

        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FsArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(StoreConfig::new(dir.path()).with_bucket("test"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (_dir, store) = store().await;
        let meta = store.put("train/model", Bytes::from_static(b"weights")).await.unwrap();

        assert_eq!(meta.version, 1);
        assert_eq!(store.get("train/model").await.unwrap().as_ref(), b"weights");
        assert_eq!(store.head("train/model").await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let (_dir, store) = store().await;
        assert!(store.get("train/model").await.unwrap_err().is_not_found());
        assert!(store.head("train/model").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_versions_and_gc() {
        let (_dir, store) = store().await;
        store.put("a/out", Bytes::from_static(b"v1")).await.unwrap();
        let meta = store.put("a/out", Bytes::from_static(b"v2")).await.unwrap();

        assert_eq!(meta.version, 2);
        assert_eq!(store.get("a/out").await.unwrap().as_ref(), b"v2");
        assert_eq!(store.gc().await.unwrap(), 1);
        assert_eq!(store.get("a/out").await.unwrap().as_ref(), b"v2");
    }

    #[tokio::test]
    async fn test_list_nested_keys() {
        let (_dir, store) = store().await;
        store.put("train/model", Bytes::from_static(b"m")).await.unwrap();
        store.put("train/reports/metrics", Bytes::from_static(b"{}")).await.unwrap();
        store.put("detect/event", Bytes::from_static(b"{}")).await.unwrap();

        let keys: Vec<String> = store
            .list("train/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(
            keys,
            vec!["train/model".to_string(), "train/reports/metrics".to_string()]
        );
        assert_eq!(store.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, store) = store().await;
        store.put("a/out", Bytes::from_static(b"x")).await.unwrap();
        store.delete("a/out").await.unwrap();
        store.delete("a/out").await.unwrap();
        assert!(store.get("a/out").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_detects_corrupt_blob() {
        let (_dir, store) = store().await;
        let meta = store.put("a/out", Bytes::from_static(b"good")).await.unwrap();
        fs::write(store.blob_path(&meta.digest), b"evil").await.unwrap();

        assert!(matches!(
            store.get("a/out").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_reopen_sees_existing_artifacts() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path());
        {
            let store = FsArtifactStore::new(config.clone()).await.unwrap();
            store.put("a/out", Bytes::from_static(b"kept")).await.unwrap();
        }
        let reopened = FsArtifactStore::new(config).await.unwrap();
        assert_eq!(reopened.get("a/out").await.unwrap().as_ref(), b"kept");
    }
}
