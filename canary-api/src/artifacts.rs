use crate::errors::Result;
use crate::model::UpdateArtifact;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::info;

/// Directory holding uploaded update bundles.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes the bundle and returns its path. Existing files with the same
    /// name are overwritten.
    pub async fn persist(&self, artifact: &UpdateArtifact) -> Result<PathBuf> {
        let name = artifact
            .name
            .as_deref()
            .and_then(file_name)
            .unwrap_or_else(fallback_name);

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, &artifact.bytes).await?;

        info!(
            "Saved update bundle to {} ({} bytes)",
            path.display(),
            artifact.bytes.len()
        );
        Ok(path)
    }
}

/// Final path component of a client-supplied name; directories are dropped.
fn file_name(name: &str) -> Option<String> {
    Path::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

fn fallback_name() -> String {
    format!("script_{}.zip", Utc::now().timestamp_millis())
}
