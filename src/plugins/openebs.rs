//! OpenEBS Volume Plugin
//!
//! Restores OpenEBS snapshots by asking the OpenEBS control plane for a clone
//! volume, then exposes the clone to the node over iSCSI.

use crate::crd::{SnapshotDataSource, VolumeSnapshotData};
use crate::domain::ports::{volume_type, RestoredVolume, VolumePlugin, VolumeSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ISCSIPersistentVolumeSource, PersistentVolume, PersistentVolumeClaim,
};
use kube::ResourceExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Annotation naming the volume a clone is taken from
pub const SOURCE_VOLUME_ANNOTATION: &str = "openebs.io/source-volume";

/// Annotation naming the snapshot a clone is taken from
pub const SNAPSHOT_ANNOTATION: &str = "openebs.io/snapshot";

/// Label added to restored volumes
pub const SOURCE_SNAPSHOT_LABEL: &str = "openebs.io/source-snapshot";

/// Longest value Kubernetes accepts for a label
const MAX_LABEL_VALUE_LEN: usize = 63;

/// StorageClass parameter overriding the filesystem type
pub const FS_TYPE_PARAMETER: &str = "fsType";

/// StorageClass parameters with this prefix are forwarded to the control plane
const FORWARDED_PARAMETER_PREFIX: &str = "openebs.io/";

/// Whether `value` is accepted by the API server as a label value
fn is_valid_label_value(value: &str) -> bool {
    let bytes = value.as_bytes();
    match (bytes.first(), bytes.last()) {
        (None, _) | (_, None) => true,
        (Some(first), Some(last)) => {
            bytes.len() <= MAX_LABEL_VALUE_LEN
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the OpenEBS plugin
#[derive(Debug, Clone)]
pub struct OpenEbsConfig {
    /// Base URL of the OpenEBS control-plane API
    pub api_url: String,
    /// Filesystem type used when the StorageClass doesn't set one
    pub default_fs_type: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for OpenEbsConfig {
    fn default() -> Self {
        Self {
            api_url: "http://maya-apiserver-service:5656".to_string(),
            default_fs_type: "ext4".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CasVolume {
    metadata: CasMetadata,
    #[serde(default)]
    spec: CasVolumeSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CasMetadata {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CasVolumeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    capacity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_portal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iqn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lun: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fs_type: Option<String>,
}

// =============================================================================
// OpenEBS Plugin
// =============================================================================

/// Plugin for OpenEBS block volume snapshots
pub struct OpenEbsPlugin {
    config: OpenEbsConfig,
    http: reqwest::Client,
}

impl OpenEbsPlugin {
    pub fn new(config: OpenEbsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn volumes_url(&self) -> String {
        format!("{}/latest/volumes/", self.config.api_url.trim_end_matches('/'))
    }

    fn volume_url(&self, name: &str) -> String {
        format!("{}{}", self.volumes_url(), name)
    }

    fn failure(operation: &str, reason: impl Into<String>) -> Error {
        Error::BackendOperationFailed {
            backend: volume_type::OPENEBS.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Request a clone volume; an existing clone from an earlier attempt is reused
    async fn create_clone(&self, request: &CasVolume) -> Result<()> {
        let response = self
            .http
            .post(self.volumes_url())
            .json(request)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            debug!("Clone volume {} already exists", request.metadata.name);
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }

    async fn read_volume(&self, name: &str) -> Result<CasVolume> {
        let volume = self
            .http
            .get(self.volume_url(name))
            .send()
            .await?
            .error_for_status()?
            .json::<CasVolume>()
            .await?;
        Ok(volume)
    }
}

#[async_trait]
impl VolumePlugin for OpenEbsPlugin {
    fn type_tag(&self) -> &str {
        volume_type::OPENEBS
    }

    async fn restore(
        &self,
        data: &VolumeSnapshotData,
        claim: &PersistentVolumeClaim,
        pv_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<RestoredVolume> {
        let snapshot_id = match data.source()? {
            SnapshotDataSource::OpenEbs(source) => source.snapshot_id.clone(),
            other => {
                return Err(Self::failure(
                    "restore",
                    format!("cannot restore a {} snapshot", other.type_tag()),
                ))
            }
        };
        let source_volume = data
            .spec
            .persistent_volume_ref
            .as_ref()
            .map(|r| r.name.clone())
            .ok_or_else(|| {
                Self::failure(
                    "restore",
                    format!("VolumeSnapshotData {} has no source volume", data.name_any()),
                )
            })?;

        let capacity = claim
            .spec
            .as_ref()
            .and_then(|spec| spec.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|requests| requests.get("storage"))
            .map(|quantity| quantity.0.clone());

        let mut annotations: BTreeMap<String, String> = parameters
            .iter()
            .filter(|(key, _)| key.starts_with(FORWARDED_PARAMETER_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        annotations.insert(SOURCE_VOLUME_ANNOTATION.into(), source_volume.clone());
        annotations.insert(SNAPSHOT_ANNOTATION.into(), snapshot_id.clone());

        let request = CasVolume {
            metadata: CasMetadata {
                name: pv_name.to_string(),
                namespace: claim.namespace(),
                annotations,
            },
            spec: CasVolumeSpec {
                capacity,
                ..Default::default()
            },
        };

        self.create_clone(&request).await?;
        let volume = self.read_volume(pv_name).await?;

        let (target_portal, iqn) = match (volume.spec.target_portal, volume.spec.iqn) {
            (Some(portal), Some(iqn)) if !portal.is_empty() && !iqn.is_empty() => (portal, iqn),
            _ => {
                return Err(Self::failure(
                    "restore",
                    format!("clone {} has no iSCSI target yet", pv_name),
                ))
            }
        };
        let fs_type = parameters
            .get(FS_TYPE_PARAMETER)
            .cloned()
            .or(volume.spec.fs_type)
            .unwrap_or_else(|| self.config.default_fs_type.clone());

        info!(
            "Cloned OpenEBS volume {} from {}@{}",
            pv_name, source_volume, snapshot_id
        );

        let restored = RestoredVolume::new(VolumeSource::Iscsi(ISCSIPersistentVolumeSource {
            target_portal,
            iqn,
            lun: volume.spec.lun.unwrap_or(0),
            fs_type: Some(fs_type),
            read_only: Some(false),
            ..Default::default()
        }));
        if !is_valid_label_value(&snapshot_id) {
            debug!(
                "Snapshot id {} is not a valid label value, not labelling {}",
                snapshot_id, pv_name
            );
            return Ok(restored);
        }
        Ok(restored.with_label(SOURCE_SNAPSHOT_LABEL, snapshot_id))
    }

    async fn delete(&self, volume: &PersistentVolume) -> Result<()> {
        let name = volume.name_any();
        if volume.spec.as_ref().and_then(|s| s.iscsi.as_ref()).is_none() {
            return Err(Self::failure(
                "delete",
                format!("{} is not an OpenEBS volume", name),
            ));
        }

        let response = self.http.delete(self.volume_url(&name)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("OpenEBS volume {} already gone", name);
            return Ok(());
        }
        response.error_for_status()?;
        info!("Deleted OpenEBS volume {}", name);
        Ok(())
    }
}
