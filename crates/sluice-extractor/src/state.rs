//! State tracker
//!
//! Persists each job's resume cursor. A cursor is saved only after the
//! batch it covers has been acknowledged by the destination, and the
//! save is made durable before the uploader proceeds, so a crash
//! between delivery and save costs at most one re-delivered batch.

use async_trait::async_trait;
use sluice_common::types::Cursor;
use sluice_common::{ExtractError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Cursor persistence for jobs
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Saved cursor for a job, if any
    async fn load(&self, job: &str) -> Result<Option<Cursor>>;

    /// Durably record a job's cursor
    async fn save(&self, job: &str, cursor: Cursor) -> Result<()>;
}

/// JSON file store, one entry per job.
///
/// Jobs own their entries exclusively; the mutex serializes writers so
/// concurrent jobs never interleave file writes.
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Cursor>>,
}

impl JsonStateStore {
    /// Open the store, reading existing state when the file exists
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ExtractError::Config(format!(
                    "state file {} is corrupt: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Write the whole map to a temp file, sync it, then rename over
    /// the store so readers never observe a partial write.
    async fn persist(&self, entries: &HashMap<String, Cursor>) -> Result<()> {
        let content = serde_json::to_vec_pretty(entries)?;
        let tmp_path = self.path.with_extension("json.tmp");

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self, job: &str) -> Result<Option<Cursor>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(job).copied())
    }

    async fn save(&self, job: &str, cursor: Cursor) -> Result<()> {
        let mut entries = self.entries.lock().await;
        // Cursors only move forward; a stale save must not rewind one
        if let Some(existing) = entries.get(job) {
            if existing.advances(&cursor) {
                debug!(job, %cursor, %existing, "Ignoring stale cursor");
                return Ok(());
            }
        }
        entries.insert(job.to_string(), cursor);
        self.persist(&entries).await?;
        debug!(job, %cursor, "Saved cursor");
        Ok(())
    }
}

/// Store for jobs configured to re-extract everything each run
pub struct NoopStateStore;

#[async_trait]
impl StateStore for NoopStateStore {
    async fn load(&self, _job: &str) -> Result<Option<Cursor>> {
        Ok(None)
    }

    async fn save(&self, _job: &str, _cursor: Cursor) -> Result<()> {
        Ok(())
    }
}
