//! Artifact keys, metadata and content digests.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::utils::Timestamp;

/// Named outputs of one stage: output name to content.
pub type Artifacts = BTreeMap<String, Bytes>;

/// Identifies an artifact by its producing stage and output name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// The producing stage.
    pub stage: String,
    /// The output name within that stage.
    pub output: String,
}

impl ArtifactKey {
    /// Creates a new artifact key.
    #[must_use]
    pub fn new(stage: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            output: output.into(),
        }
    }

    /// Returns the flat store key, `"<stage>/<output>"`.
    #[must_use]
    pub fn to_store_key(&self) -> String {
        format!("{}/{}", self.stage, self.output)
    }

    /// Splits a flat store key at its first `/`.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let (stage, output) = key.split_once('/')?;
        if stage.is_empty() || output.is_empty() {
            return None;
        }
        Some(Self::new(stage, output))
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stage, self.output)
    }
}

/// Metadata of one stored artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// The store key.
    pub key: String,
    /// Lowercase hex SHA-256 of the content.
    pub digest: String,
    /// Content length in bytes.
    pub size: u64,
    /// Version number of this key, starting at 1. Overwrites bump it.
    pub version: u64,
    /// When this version was written.
    pub created_at: Timestamp,
}

/// Computes the content address of `data`.
#[must_use]
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_key_format() {
        let key = ArtifactKey::new("train", "model");
        assert_eq!(key.to_store_key(), "train/model");
        assert_eq!(key.to_string(), "train/model");
    }

    #[test]
    fn test_parse_store_key() {
        let key = ArtifactKey::parse("train/model/v2").unwrap();
        assert_eq!(key.stage, "train");
        assert_eq!(key.output, "model/v2");

        assert!(ArtifactKey::parse("nothing").is_none());
        assert!(ArtifactKey::parse("/x").is_none());
        assert!(ArtifactKey::parse("x/").is_none());
    }

    #[test]
    fn test_content_digest_is_sha256() {
        assert_eq!(
            content_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_digest(b"abc"), content_digest(b"abc"));
        assert_ne!(content_digest(b"abc"), content_digest(b"abd"));
    }
}
