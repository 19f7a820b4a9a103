//! Persisted partition settings
//!
//! Operator pause flags survive restarts: pausing processing or exporting is
//! persisted before the running service is touched, and the flags are loaded
//! back into the context during bootstrap.

use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PartitionId;

/// Operator-controlled flags that survive restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSettings {
    /// Record processing is paused by an operator.
    #[serde(default)]
    pub processing_paused: bool,

    /// Exporting is paused by an operator.
    #[serde(default)]
    pub exporting_paused: bool,
}

/// Errors reading or writing persisted settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings medium could not be read or written.
    #[error("failed to access settings: {0}")]
    Io(#[from] std::io::Error),

    /// The stored settings could not be decoded.
    #[error("failed to decode settings: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Persistence medium for [`PartitionSettings`]; atomicity is delegated to
/// the implementation.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Loads the persisted settings, defaulting when none were stored yet.
    async fn load(&self) -> Result<PartitionSettings, SettingsError>;

    /// Persists the settings.
    async fn store(&self, settings: PartitionSettings) -> Result<(), SettingsError>;
}

/// In-memory settings store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: RwLock<PartitionSettings>,
}

impl MemorySettingsStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<PartitionSettings, SettingsError> {
        Ok(*self.settings.read().expect("settings lock poisoned"))
    }

    async fn store(&self, settings: PartitionSettings) -> Result<(), SettingsError> {
        *self.settings.write().expect("settings lock poisoned") = settings;
        Ok(())
    }
}

/// Settings persisted as a JSON file under the partition's data directory.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    /// Creates a store writing to `<dir>/partition-<id>-settings.json`.
    pub fn new(dir: impl Into<PathBuf>, partition_id: PartitionId) -> Self {
        let mut path = dir.into();
        path.push(format!("partition-{partition_id}-settings.json"));
        Self { path }
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self) -> Result<PartitionSettings, SettingsError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(PartitionSettings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, settings: PartitionSettings) -> Result<(), SettingsError> {
        let bytes = serde_json::to_vec_pretty(&settings)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path(), PartitionId(1));

        let settings = store.load().await.unwrap();
        assert_eq!(settings, PartitionSettings::default());
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path(), PartitionId(3));

        let settings = PartitionSettings {
            processing_paused: true,
            exporting_paused: false,
        };
        store.store(settings).await.unwrap();

        let reloaded = FileSettingsStore::new(dir.path(), PartitionId(3));
        assert_eq!(reloaded.load().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path(), PartitionId(7));
        tokio::fs::write(&store.path, b"not json").await.unwrap();

        assert!(matches!(
            store.load().await,
            Err(SettingsError::Decode(_))
        ));
    }
}
