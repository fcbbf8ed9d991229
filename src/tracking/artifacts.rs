//! Filesystem artifact store
//!
//! Artifacts of a run live under `<root>/<run_id>/`, addressed by relative
//! slash-separated paths.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{MlopsError, Result};

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

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Absolute location of an artifact; rejects paths escaping the run directory
    pub fn resolve(&self, run_id: &str, artifact_path: &str) -> Result<PathBuf> {
        let relative = Path::new(artifact_path);
        let valid = !artifact_path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(MlopsError::TrackingError(format!(
                "invalid artifact path '{}'",
                artifact_path
            )));
        }
        Ok(self.run_dir(run_id).join(relative))
    }

    /// Store bytes at `artifact_path`
    pub fn put_bytes(&self, run_id: &str, artifact_path: &str, bytes: &[u8]) -> Result<PathBuf> {
        let target = self.resolve(run_id, artifact_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
        Ok(target)
    }

    /// Copy a local file under `dest_dir` (or the run root) keeping its file name.
    /// Returns the artifact path.
    pub fn put_file(&self, run_id: &str, local: &Path, dest_dir: Option<&str>) -> Result<String> {
        let file_name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                MlopsError::TrackingError(format!("cannot log {} as an artifact", local.display()))
            })?;

        let artifact_path = match dest_dir {
            Some(dir) => format!("{}/{}", dir.trim_end_matches('/'), file_name),
            None => file_name.to_string(),
        };

        let target = self.resolve(run_id, &artifact_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &target)?;
        Ok(artifact_path)
    }

    pub fn read(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(run_id, artifact_path)?)?)
    }
}
