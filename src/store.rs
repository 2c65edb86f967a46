// store.rs - On-disk artifact store
// Purpose: One current artifact per (target, stage). Writes go to a temp
//          file that is renamed over the old artifact, so readers only ever
//          see a complete version.

use crate::artifact::{Artifact, ArtifactMeta, StageOutput};
use crate::error::{FailureKind, ItemFailure, ReconError, Result};
use crate::model::{Stage, Target, STAGE_ORDER};
use chrono::Utc;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const ARTIFACT_FILE: &str = "artifact.json";

#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    locks: Arc<DashMap<(Target, Stage), Arc<RwLock<()>>>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target_dir(&self, target: &Target) -> PathBuf {
        self.root.join(target.dir_name())
    }

    pub fn stage_dir(&self, target: &Target, stage: Stage) -> PathBuf {
        self.target_dir(target).join(stage.artifact_dir())
    }

    pub fn artifact_path(&self, target: &Target, stage: Stage) -> PathBuf {
        self.stage_dir(target, stage).join(ARTIFACT_FILE)
    }

    fn lock_for(&self, target: &Target, stage: Stage) -> Arc<RwLock<()>> {
        self.locks
            .entry((target.clone(), stage))
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Replace the (target, stage) artifact with `output`.
    pub async fn write(&self, target: &Target, run_id: &str, output: StageOutput) -> Result<Artifact> {
        let stage = output.stage();
        let lock = self.lock_for(target, stage);
        let _guard = lock.write().await;

        let path = self.artifact_path(target, stage);
        let version = match read_artifact_file(&path).await {
            Ok(Some(previous)) => previous.meta.version + 1,
            _ => 1,
        };

        let artifact = Artifact {
            meta: ArtifactMeta {
                target: target.clone(),
                stage,
                version,
                run_id: run_id.to_string(),
                produced_at: Utc::now(),
            },
            output,
        };

        let json = serde_json::to_vec_pretty(&artifact)?;
        write_atomic(&path, &json).await?;
        debug!(target = %target, stage = %stage, version, path = %path.display(), "artifact written");
        Ok(artifact)
    }

    pub async fn read(&self, target: &Target, stage: Stage) -> Result<Option<Artifact>> {
        let lock = self.lock_for(target, stage);
        let _guard = lock.read().await;
        read_artifact_file(&self.artifact_path(target, stage)).await
    }

    /// Every current artifact for the target in canonical order. Corrupt
    /// artifacts are reported, not fatal.
    pub async fn read_all(&self, target: &Target) -> (Vec<Artifact>, Vec<ItemFailure>) {
        let mut artifacts = Vec::new();
        let mut failures = Vec::new();

        for stage in STAGE_ORDER {
            match self.read(target, stage).await {
                Ok(Some(artifact)) => artifacts.push(artifact),
                Ok(None) => {}
                Err(e) => {
                    warn!(target = %target, stage = %stage, error = %e, "unreadable artifact");
                    failures.push(ItemFailure::from_error(format!("{}/{}", target, stage), &e));
                }
            }
        }

        (artifacts, failures)
    }

    /// Write an arbitrary file under the store root with the same
    /// temp-then-rename discipline.
    pub async fn write_file(&self, relative: impl AsRef<Path>, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.root.join(relative);
        write_atomic(&path, bytes).await?;
        Ok(path)
    }
}

/// Artifacts found directly below a target directory produced by an earlier
/// run (`<dir>/<stage dir>/artifact.json`).
pub async fn read_artifacts_in_dir(dir: &Path) -> (Vec<Artifact>, Vec<ItemFailure>) {
    let mut artifacts = Vec::new();
    let mut failures = Vec::new();

    for stage in STAGE_ORDER {
        let path = dir.join(stage.artifact_dir()).join(ARTIFACT_FILE);
        match read_artifact_file(&path).await {
            Ok(Some(artifact)) => artifacts.push(artifact),
            Ok(None) => {}
            Err(e) => failures.push(ItemFailure::new(path.display().to_string(), FailureKind::Data, e.to_string())),
        }
    }

    (artifacts, failures)
}

async fn read_artifact_file(path: &Path) -> Result<Option<Artifact>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ReconError::Data(format!("corrupt artifact {}: {}", path.display(), e)))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ReconError::Configuration(format!("invalid artifact path {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let mut file = tokio::fs::File::create(&tmp).await?;
    let written = async {
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::GatherOutput;

    #[tokio::test]
    async fn test_write_then_read_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let target = Target::new("example.com");

        assert!(store.read(&target, Stage::Gather).await.unwrap().is_none());

        let first = store
            .write(&target, "run-1", StageOutput::Gather(GatherOutput::default()))
            .await
            .unwrap();
        let second = store
            .write(&target, "run-2", StageOutput::Gather(GatherOutput::default()))
            .await
            .unwrap();
        assert_eq!(first.meta.version, 1);
        assert_eq!(second.meta.version, 2);

        let current = store.read(&target, Stage::Gather).await.unwrap().unwrap();
        assert_eq!(current.meta.run_id, "run-2");
        assert!(store.artifact_path(&target, Stage::Gather).ends_with("example.com/urls/artifact.json"));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let target = Target::new("example.com");
        store
            .write(&target, "run", StageOutput::Gather(GatherOutput::default()))
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(store.stage_dir(&target, Stage::Gather))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["artifact.json".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_artifact_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let target = Target::new("example.com");
        let path = store.artifact_path(&target, Stage::Verify);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ truncated").unwrap();

        let err = store.read(&target, Stage::Verify).await.unwrap_err();
        assert!(matches!(err, ReconError::Data(_)));

        let (artifacts, failures) = store.read_all(&target).await;
        assert!(artifacts.is_empty());
        assert_eq!(failures.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let target = Target::new("example.com");

        let writes: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let target = target.clone();
                tokio::spawn(async move {
                    store
                        .write(&target, &format!("run-{}", i), StageOutput::Gather(GatherOutput::default()))
                        .await
                })
            })
            .collect();
        for w in writes {
            w.await.unwrap().unwrap();
        }

        let current = store.read(&target, Stage::Gather).await.unwrap().unwrap();
        assert_eq!(current.meta.version, 8);
    }
}
