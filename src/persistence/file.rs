use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{RegistrySnapshot, SnapshotStore};
use crate::Result;

/// Snapshot kept as a JSON document on disk
///
/// Writes go to a sibling temp file first and are renamed into place.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            baskets = snapshot.baskets.len(),
            entries = snapshot.entries.len(),
            "Saved registry snapshot"
        );
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<RegistrySnapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: RegistrySnapshot = serde_json::from_slice(&bytes)?;
        tracing::info!(
            "Loaded {} baskets and {} entries from {}",
            snapshot.baskets.len(),
            snapshot.entries.len(),
            self.path.display()
        );
        Ok(Some(snapshot))
    }
}
