use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::Result;

const PARTIAL_EXTENSION: &str = "part";

/// Location and size of a written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Directory holding generated report files.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Writes through a `.part` file renamed into place, so readers never see
    /// a partially written artifact under its final name.
    pub async fn write(&self, file_name: &str, bytes: &[u8]) -> Result<ArtifactRef> {
        self.ensure_dir().await?;
        let path = self.resolve(file_name);
        let partial = self.resolve(&format!("{file_name}.{PARTIAL_EXTENSION}"));

        let written = match fs::write(&partial, bytes).await {
            Ok(()) => fs::rename(&partial, &path).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            remove_if_present(&partial).await;
            return Err(err.into());
        }
        debug!(file = %path.display(), size = bytes.len(), "artifact written");

        Ok(ArtifactRef {
            file_name: file_name.to_string(),
            path,
            size_bytes: bytes.len() as u64,
        })
    }

    pub async fn read(&self, file_name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(file_name)).await?)
    }

    /// Deletes an artifact; a missing file is not an error.
    pub async fn remove(&self, file_name: &str) -> Result<()> {
        match fs::remove_file(self.resolve(file_name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes `.part` files left by attempts that were cut off mid-write.
    /// Only safe while no worker is writing.
    pub async fn sweep_partial(&self) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == PARTIAL_EXTENSION) {
                fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            warn!(removed, dir = %self.root.display(), "removed partial artifacts");
        }
        Ok(removed)
    }
}

async fn remove_if_present(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            warn!(file = %path.display(), error = %err, "failed to remove partial artifact");
        }
    }
}
