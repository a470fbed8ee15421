//! HostPath Volume Plugin
//!
//! Restores local-path snapshots by copying the snapshot tree into a fresh
//! directory under the restore root.

use crate::crd::{SnapshotDataSource, VolumeSnapshotData};
use crate::domain::ports::{volume_type, RestoredVolume, VolumePlugin, VolumeSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{HostPathVolumeSource, PersistentVolume, PersistentVolumeClaim};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the hostPath plugin
#[derive(Debug, Clone)]
pub struct HostPathConfig {
    /// Directory that receives restored volumes
    pub restore_root: PathBuf,
}

impl Default for HostPathConfig {
    fn default() -> Self {
        Self {
            restore_root: PathBuf::from("/tmp/restore/hostpath"),
        }
    }
}

// =============================================================================
// HostPath Plugin
// =============================================================================

/// Plugin for snapshots kept on a node-local path
pub struct HostPathPlugin {
    config: HostPathConfig,
}

impl HostPathPlugin {
    pub fn new(config: HostPathConfig) -> Self {
        Self { config }
    }

    fn failure(operation: &str, reason: impl Into<String>) -> Error {
        Error::BackendOperationFailed {
            backend: volume_type::HOST_PATH.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Directory a volume named `pv_name` is restored into
    fn volume_dir(&self, pv_name: &str) -> Result<PathBuf> {
        let mut components = Path::new(pv_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.config.restore_root.join(pv_name)),
            _ => Err(Error::InvalidRequest(format!(
                "volume name {:?} is not a plain path segment",
                pv_name
            ))),
        }
    }
}

/// Copy a file or directory tree, returning the number of files copied
async fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    let mut copied = 0;

    while let Some((from, to)) = pending.pop() {
        let metadata = fs::symlink_metadata(&from).await?;
        if metadata.is_dir() {
            fs::create_dir_all(&to).await?;
            let mut entries = fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                pending.push((entry.path(), to.join(entry.file_name())));
            }
        } else if metadata.is_file() {
            fs::copy(&from, &to).await?;
            copied += 1;
        } else {
            debug!("Skipping special file {}", from.display());
        }
    }

    Ok(copied)
}

async fn remove_dir_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl VolumePlugin for HostPathPlugin {
    fn type_tag(&self) -> &str {
        volume_type::HOST_PATH
    }

    async fn restore(
        &self,
        data: &VolumeSnapshotData,
        _claim: &PersistentVolumeClaim,
        pv_name: &str,
        _parameters: &BTreeMap<String, String>,
    ) -> Result<RestoredVolume> {
        let snapshot = match data.source()? {
            SnapshotDataSource::HostPath(source) => PathBuf::from(&source.path),
            other => {
                return Err(Self::failure(
                    "restore",
                    format!("cannot restore a {} snapshot", other.type_tag()),
                ))
            }
        };
        let target = self.volume_dir(pv_name)?;
        // Resolve symlinks once so the copy walks the real snapshot tree
        let resolved = fs::canonicalize(&snapshot).await.map_err(|e| {
            Self::failure("restore", format!("snapshot {}: {}", snapshot.display(), e))
        })?;
        let metadata = fs::metadata(&resolved).await.map_err(|e| {
            Self::failure("restore", format!("snapshot {}: {}", snapshot.display(), e))
        })?;

        // A previous attempt may have left a partial copy behind
        remove_dir_if_present(&target).await?;
        fs::create_dir_all(&target).await?;

        let destination = if metadata.is_dir() {
            target.clone()
        } else {
            match snapshot.file_name() {
                Some(file_name) => target.join(file_name),
                None => {
                    return Err(Self::failure(
                        "restore",
                        format!("snapshot path {} has no file name", snapshot.display()),
                    ))
                }
            }
        };

        let copied = copy_tree(&resolved, &destination).await.map_err(|e| {
            Self::failure(
                "restore",
                format!("copy {} to {}: {}", snapshot.display(), target.display(), e),
            )
        })?;
        info!(
            "Restored {} files from {} into {}",
            copied,
            snapshot.display(),
            target.display()
        );

        Ok(RestoredVolume::new(VolumeSource::HostPath(HostPathVolumeSource {
            path: target.to_string_lossy().into_owned(),
            type_: Some("DirectoryOrCreate".into()),
        })))
    }

    async fn delete(&self, volume: &PersistentVolume) -> Result<()> {
        let path = volume
            .spec
            .as_ref()
            .and_then(|spec| spec.host_path.as_ref())
            .map(|source| PathBuf::from(&source.path))
            .ok_or_else(|| Self::failure("delete", format!("{} is not a hostPath volume", volume.name_any())))?;

        // Only ever remove directories this plugin created
        if path.parent() != Some(self.config.restore_root.as_path()) {
            return Err(Self::failure(
                "delete",
                format!(
                    "{} is outside restore root {}",
                    path.display(),
                    self.config.restore_root.display()
                ),
            ));
        }

        remove_dir_if_present(&path).await?;
        info!("Removed hostPath volume directory {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GlusterSnapshotSource, HostPathSnapshotSource, VolumeSnapshotDataSpec};
    use crate::provisioner::testing::claim;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::PersistentVolumeSpec;
    use tempfile::TempDir;

    fn data(path: &Path) -> VolumeSnapshotData {
        VolumeSnapshotData::new(
            "data1",
            VolumeSnapshotDataSpec {
                host_path: Some(HostPathSnapshotSource {
                    path: path.to_string_lossy().into_owned(),
                }),
                ..Default::default()
            },
        )
    }

    fn plugin(root: &Path) -> HostPathPlugin {
        HostPathPlugin::new(HostPathConfig {
            restore_root: root.to_path_buf(),
        })
    }

    fn volume_at(path: &str) -> PersistentVolume {
        let mut spec = PersistentVolumeSpec::default();
        spec.host_path = Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: None,
        });
        PersistentVolume {
            spec: Some(spec),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_restore_copies_directory_tree() {
        let snapshots = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let snap = snapshots.path().join("snap1");
        std::fs::create_dir_all(snap.join("nested")).unwrap();
        std::fs::write(snap.join("a.txt"), b"alpha").unwrap();
        std::fs::write(snap.join("nested/b.txt"), b"beta").unwrap();

        let restored = plugin(root.path())
            .restore(&data(&snap), &claim("ns", "c1", Some("snap1")), "pv-c1", &BTreeMap::new())
            .await
            .unwrap();

        let target = root.path().join("pv-c1");
        assert_matches!(
            &restored.source,
            VolumeSource::HostPath(source) if Path::new(&source.path) == target
        );
        assert!(restored.labels.is_empty());
        assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(target.join("nested/b.txt")).unwrap(), b"beta");
    }

    #[tokio::test]
    async fn test_restore_single_file_snapshot() {
        let snapshots = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let snap = snapshots.path().join("snap1.img");
        std::fs::write(&snap, b"image").unwrap();

        plugin(root.path())
            .restore(&data(&snap), &claim("ns", "c1", Some("snap1")), "pv-c1", &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(root.path().join("pv-c1/snap1.img")).unwrap(),
            b"image"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restore_follows_symlinked_snapshot() {
        let snapshots = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let real = snapshots.path().join("snap1-real");
        std::fs::create_dir_all(&real).unwrap();
        std::fs::write(real.join("a.txt"), b"alpha").unwrap();
        let link = snapshots.path().join("snap1");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        plugin(root.path())
            .restore(&data(&link), &claim("ns", "c1", Some("snap1")), "pv-c1", &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(root.path().join("pv-c1/a.txt")).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn test_restore_replaces_partial_copy() {
        let snapshots = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let snap = snapshots.path().join("snap1");
        std::fs::create_dir_all(&snap).unwrap();
        std::fs::write(snap.join("a.txt"), b"alpha").unwrap();
        std::fs::create_dir_all(root.path().join("pv-c1")).unwrap();
        std::fs::write(root.path().join("pv-c1/stale.txt"), b"stale").unwrap();

        plugin(root.path())
            .restore(&data(&snap), &claim("ns", "c1", Some("snap1")), "pv-c1", &BTreeMap::new())
            .await
            .unwrap();

        assert!(!root.path().join("pv-c1/stale.txt").exists());
        assert!(root.path().join("pv-c1/a.txt").exists());
    }

    #[tokio::test]
    async fn test_restore_missing_snapshot_fails() {
        let root = TempDir::new().unwrap();
        let err = plugin(root.path())
            .restore(
                &data(&root.path().join("does-not-exist")),
                &claim("ns", "c1", Some("snap1")),
                "pv-c1",
                &BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::BackendOperationFailed { ref operation, .. } if operation == "restore");
    }

    #[tokio::test]
    async fn test_restore_rejects_other_sources_and_bad_names() {
        let root = TempDir::new().unwrap();
        let gluster = VolumeSnapshotData::new(
            "data1",
            VolumeSnapshotDataSpec {
                gluster_snapshot_volume: Some(GlusterSnapshotSource {
                    snapshot_id: "g1".into(),
                }),
                ..Default::default()
            },
        );
        let plugin = plugin(root.path());
        assert!(plugin
            .restore(&gluster, &claim("ns", "c1", None), "pv-c1", &BTreeMap::new())
            .await
            .is_err());

        let err = plugin
            .restore(&data(root.path()), &claim("ns", "c1", None), "../escape", &BTreeMap::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidRequest(_));
    }

    #[tokio::test]
    async fn test_delete_removes_directory_and_is_idempotent() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("pv-c1");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("a.txt"), b"alpha").unwrap();

        let plugin = plugin(root.path());
        let volume = volume_at(&target.to_string_lossy());
        plugin.delete(&volume).await.unwrap();
        assert!(!target.exists());
        plugin.delete(&volume).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_refuses_paths_outside_root() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();

        let err = plugin(root.path())
            .delete(&volume_at(&outside.path().to_string_lossy()))
            .await
            .unwrap_err();
        assert_matches!(err, Error::BackendOperationFailed { ref operation, .. } if operation == "delete");
        assert!(outside.path().exists());
    }
}
