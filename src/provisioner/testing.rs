//! Shared fixtures for provisioner tests

use super::SNAPSHOT_PVC_ANNOTATION;
use crate::crd::{
    HostPathSnapshotSource, VolumeSnapshot, VolumeSnapshotData, VolumeSnapshotDataSpec,
    VolumeSnapshotSpec,
};
use crate::domain::ports::{volume_type, RestoredVolume, VolumePlugin, VolumeSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    GlusterfsPersistentVolumeSource, HostPathVolumeSource, ISCSIPersistentVolumeSource,
    PersistentVolume, PersistentVolumeClaim,
};
use k8s_openapi::api::storage::v1::StorageClass;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Plugin that records its calls and restores to a predictable source
pub struct FakePlugin {
    tag: String,
    fail: bool,
    labels: BTreeMap<String, String>,
    restores: AtomicUsize,
    deletes: AtomicUsize,
    last_pv_name: Mutex<Option<String>>,
    last_parameters: Mutex<Option<BTreeMap<String, String>>>,
    last_deleted: Mutex<Option<PersistentVolume>>,
}

impl FakePlugin {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            fail: false,
            labels: BTreeMap::new(),
            restores: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            last_pv_name: Mutex::new(None),
            last_parameters: Mutex::new(None),
            last_deleted: Mutex::new(None),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn restore_calls(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn last_pv_name(&self) -> Option<String> {
        self.last_pv_name.lock().unwrap().clone()
    }

    pub fn last_parameters(&self) -> Option<BTreeMap<String, String>> {
        self.last_parameters.lock().unwrap().clone()
    }

    pub fn last_deleted(&self) -> Option<PersistentVolume> {
        self.last_deleted.lock().unwrap().clone()
    }

    fn failure(&self, operation: &str) -> Error {
        Error::BackendOperationFailed {
            backend: self.tag.clone(),
            operation: operation.into(),
            reason: "injected failure".into(),
        }
    }
}

#[async_trait]
impl VolumePlugin for FakePlugin {
    fn type_tag(&self) -> &str {
        &self.tag
    }

    async fn restore(
        &self,
        _data: &VolumeSnapshotData,
        _claim: &PersistentVolumeClaim,
        pv_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<RestoredVolume> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        *self.last_pv_name.lock().unwrap() = Some(pv_name.to_string());
        *self.last_parameters.lock().unwrap() = Some(parameters.clone());
        if self.fail {
            return Err(self.failure("restore"));
        }

        let source = match self.tag.as_str() {
            volume_type::GLUSTERFS => VolumeSource::Glusterfs(GlusterfsPersistentVolumeSource {
                endpoints: "glusterfs-cluster".into(),
                path: pv_name.to_string(),
                ..Default::default()
            }),
            volume_type::OPENEBS => VolumeSource::Iscsi(ISCSIPersistentVolumeSource {
                target_portal: "10.0.0.1:3260".into(),
                iqn: format!("iqn.2016-09.com.openebs.jiva:{}", pv_name),
                lun: 0,
                ..Default::default()
            }),
            _ => VolumeSource::HostPath(HostPathVolumeSource {
                path: format!("/exports/restored-{}", pv_name),
                type_: None,
            }),
        };
        let mut restored = RestoredVolume::new(source);
        restored.labels = self.labels.clone();
        Ok(restored)
    }

    async fn delete(&self, volume: &PersistentVolume) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        *self.last_deleted.lock().unwrap() = Some(volume.clone());
        if self.fail {
            return Err(self.failure("delete"));
        }
        Ok(())
    }
}

/// A 5Gi ReadWriteOnce claim, optionally referencing a snapshot
pub fn claim(namespace: &str, name: &str, snapshot: Option<&str>) -> PersistentVolumeClaim {
    let mut annotations = serde_json::Map::new();
    if let Some(snapshot) = snapshot {
        annotations.insert(SNAPSHOT_PVC_ANNOTATION.to_string(), snapshot.into());
    }
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": format!("uid-{}", name),
            "annotations": annotations,
        },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "storageClassName": "snapshot-promoter",
            "resources": { "requests": { "storage": "5Gi" } },
        }
    }))
    .unwrap()
}

pub fn storage_class(reclaim_policy: &str) -> StorageClass {
    serde_json::from_value(serde_json::json!({
        "metadata": { "name": "snapshot-promoter" },
        "provisioner": super::PROVISIONER_NAME,
        "reclaimPolicy": reclaim_policy,
        "parameters": {},
    }))
    .unwrap()
}

pub fn snapshot(namespace: &str, name: &str, data_name: &str) -> VolumeSnapshot {
    let mut snapshot = VolumeSnapshot::new(
        name,
        VolumeSnapshotSpec {
            persistent_volume_claim_name: "c0".into(),
            snapshot_data_name: data_name.into(),
        },
    );
    snapshot.metadata.namespace = Some(namespace.to_string());
    snapshot
}

pub fn host_path_data(name: &str, path: &str) -> VolumeSnapshotData {
    VolumeSnapshotData::new(
        name,
        VolumeSnapshotDataSpec {
            host_path: Some(HostPathSnapshotSource {
                path: path.to_string(),
            }),
            ..Default::default()
        },
    )
}
