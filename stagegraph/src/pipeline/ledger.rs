//! Persistence of completed runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::RunResult;
use crate::errors::LedgerError;
use crate::utils::generate_uuid;

/// Storage for run results, keyed by run id.
///
/// Recording the same run twice replaces the earlier entry, so re-recording a
/// completed run is harmless.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Stores `run` under its run id.
    async fn record(&self, run: &RunResult) -> Result<(), LedgerError>;

    /// Loads a stored run.
    async fn load(&self, run_id: &str) -> Result<RunResult, LedgerError>;

    /// Lists stored run ids, sorted.
    async fn list(&self) -> Result<Vec<String>, LedgerError>;
}

/// In-memory run ledger.
#[derive(Debug, Default)]
pub struct InMemoryRunLedger {
    runs: RwLock<BTreeMap<String, RunResult>>,
}

impl InMemoryRunLedger {
    /// Creates a new in-memory ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    /// Returns true if no run is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

#[async_trait]
impl RunLedger for InMemoryRunLedger {
    async fn record(&self, run: &RunResult) -> Result<(), LedgerError> {
        self.runs.write().insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<RunResult, LedgerError> {
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn list(&self) -> Result<Vec<String>, LedgerError> {
        Ok(self.runs.read().keys().cloned().collect())
    }
}

/// Run ledger keeping one JSON document per run in a directory.
#[derive(Debug, Clone)]
pub struct FileRunLedger {
    dir: PathBuf,
}

impl FileRunLedger {
    /// Opens (creating if needed) a ledger in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Io` if the directory cannot be created.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Returns the ledger directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf, LedgerError> {
        let valid = !run_id.is_empty()
            && !run_id.starts_with('.')
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(LedgerError::InvalidRunId {
                run_id: run_id.to_string(),
            });
        }
        Ok(self.dir.join(format!("{run_id}.json")))
    }
}

#[async_trait]
impl RunLedger for FileRunLedger {
    async fn record(&self, run: &RunResult) -> Result<(), LedgerError> {
        let path = self.path_for(&run.run_id)?;
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", run.run_id, generate_uuid().simple()));

        fs::write(&tmp, serde_json::to_vec_pretty(run)?).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!(run_id = %run.run_id, path = %path.display(), "Recorded run");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<RunResult, LedgerError> {
        let path = self.path_for(run_id)?;
        match fs::read(&path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LedgerError::NotFound {
                run_id: run_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, LedgerError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
