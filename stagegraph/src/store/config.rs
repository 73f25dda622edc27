//! Artifact store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::StagegraphError;

/// Where a filesystem-backed store keeps its objects.
///
/// Passed explicitly to [`super::FsArtifactStore::new`]; nothing is read
/// from global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory.
    pub root: PathBuf,
    /// Bucket name; one subdirectory of the root.
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_bucket() -> String {
    "artifacts".to_string()
}

impl StoreConfig {
    /// Creates a configuration rooted at `root` with the default bucket.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bucket: default_bucket(),
        }
    }

    /// Sets the bucket.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Reads `STAGEGRAPH_STORE_ROOT` (required) and `STAGEGRAPH_BUCKET`.
    ///
    /// # Errors
    ///
    /// Returns `StagegraphError::Config` if the root is not set.
    pub fn from_env() -> Result<Self, StagegraphError> {
        let root = std::env::var("STAGEGRAPH_STORE_ROOT")
            .map_err(|_| StagegraphError::Config("STAGEGRAPH_STORE_ROOT is not set".to_string()))?;
        let mut config = Self::new(root);
        if let Ok(bucket) = std::env::var("STAGEGRAPH_BUCKET") {
            config.bucket = bucket;
        }
        Ok(config)
    }

    /// Returns the bucket directory.
    #[must_use]
    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }
}
