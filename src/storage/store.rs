//! Key/value state store
//!
//! The orchestrator persists the instances array as one opaque JSON blob
//! through the [`StateStore`] capability. The file-backed implementation
//! writes atomically (tmp file + rename) under the per-user data directory.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, StorageError};

/// Blob-level persistence consumed by [`super::Storage`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist the serialized instances blob.
    async fn save_instances(&self, data: &[u8]) -> Result<()>;

    /// Fetch the serialized instances blob; empty when nothing was saved yet.
    async fn get_instances(&self) -> Result<Vec<u8>>;

    /// Drop all persisted instance state.
    async fn delete_all_instances(&self) -> Result<()>;
}

/// File-backed JSON store.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the per-user data directory.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(Config::state_file_path()?))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save_instances(&self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::SaveFailed(format!("create state dir: {e}")))?;
        }

        // Write-then-rename keeps the blob intact if the process dies mid-save.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| StorageError::SaveFailed(format!("write temp file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::SaveFailed(format!("rename temp file: {e}")))?;

        debug!("Saved {} bytes to {:?}", data.len(), self.path);
        Ok(())
    }

    async fn get_instances(&self) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::LoadFailed(format!("read state file: {e}")).into()),
        }
    }

    async fn delete_all_instances(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::SaveFailed(format!("remove state file: {e}")).into()),
        }
    }
}
