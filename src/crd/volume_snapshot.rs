//! VolumeSnapshot and VolumeSnapshotData CRDs
//!
//! A `VolumeSnapshot` is the namespaced, user-facing name of a snapshot. Once
//! the snapshot controller has taken it, the snapshot is bound to a
//! cluster-scoped `VolumeSnapshotData` describing where the bytes live.

use crate::domain::ports::volume_type;
use crate::error::{Error, Result};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group shared by both snapshot resources
pub const GROUP: &str = "volumesnapshot.external-storage.k8s.io";

/// Plural of the VolumeSnapshot resource
pub const VOLUME_SNAPSHOT_PLURAL: &str = "volumesnapshots";

/// Plural of the VolumeSnapshotData resource
pub const VOLUME_SNAPSHOT_DATA_PLURAL: &str = "volumesnapshotdatas";

// =============================================================================
// VolumeSnapshot CRD
// =============================================================================

/// VolumeSnapshot is a user's request for a point-in-time copy of a claim.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "volumesnapshot.external-storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    status = "VolumeSnapshotStatus",
    printcolumn = r#"{"name": "Claim", "type": "string", "jsonPath": ".spec.persistentVolumeClaimName"}"#,
    printcolumn = r#"{"name": "Data", "type": "string", "jsonPath": ".spec.snapshotDataName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// Claim the snapshot was taken from
    #[serde(default)]
    pub persistent_volume_claim_name: String,

    /// Name of the bound VolumeSnapshotData, empty until binding completes
    #[serde(default)]
    pub snapshot_data_name: String,
}

/// Observed state of a VolumeSnapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(default)]
    pub conditions: Vec<VolumeSnapshotCondition>,
}

/// A single condition reported by the snapshot controller
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl VolumeSnapshot {
    /// Name of the bound data record, if binding has completed
    pub fn bound_data_name(&self) -> Option<&str> {
        let name = self.spec.snapshot_data_name.as_str();
        (!name.is_empty()).then_some(name)
    }
}

// =============================================================================
// VolumeSnapshotData CRD
// =============================================================================

/// VolumeSnapshotData is the immutable, backend-specific descriptor of a
/// physical snapshot. Exactly one source field must be populated.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "volumesnapshot.external-storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshotData",
    plural = "volumesnapshotdatas",
    printcolumn = r#"{"name": "Snapshot", "type": "string", "jsonPath": ".spec.volumeSnapshotRef.name"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotDataSpec {
    /// Snapshot taken on a local path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathSnapshotSource>,

    /// Snapshot of a GlusterFS volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gluster_snapshot_volume: Option<GlusterSnapshotSource>,

    /// Snapshot of an OpenEBS block volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openebs_volume: Option<OpenEbsSnapshotSource>,

    /// Back-reference to the VolumeSnapshot this data is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_ref: Option<SnapshotObjectRef>,

    /// PersistentVolume the snapshot was taken from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_ref: Option<SnapshotObjectRef>,
}

/// Location of a hostPath snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HostPathSnapshotSource {
    /// Path of the snapshot on the node
    #[serde(rename = "snapshot")]
    pub path: String,
}

/// Identifier of a GlusterFS volume snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlusterSnapshotSource {
    pub snapshot_id: String,
}

/// Identifier of an OpenEBS volume snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenEbsSnapshotSource {
    pub snapshot_id: String,
}

/// Minimal object reference carried by snapshot data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotObjectRef {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub uid: Option<String>,
}

// =============================================================================
// Typed Source
// =============================================================================

/// The single populated source of a VolumeSnapshotData
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotDataSource<'a> {
    HostPath(&'a HostPathSnapshotSource),
    Gluster(&'a GlusterSnapshotSource),
    OpenEbs(&'a OpenEbsSnapshotSource),
}

impl SnapshotDataSource<'_> {
    /// Backend tag of the plugin able to restore this source
    pub fn type_tag(&self) -> &'static str {
        match self {
            SnapshotDataSource::HostPath(_) => volume_type::HOST_PATH,
            SnapshotDataSource::Gluster(_) => volume_type::GLUSTERFS,
            SnapshotDataSource::OpenEbs(_) => volume_type::OPENEBS,
        }
    }
}

impl VolumeSnapshotData {
    /// Resolve the typed source, rejecting records with zero or several
    /// populated sources.
    pub fn source(&self) -> Result<SnapshotDataSource<'_>> {
        let spec = &self.spec;
        let mut found: Vec<SnapshotDataSource<'_>> = Vec::with_capacity(1);
        if let Some(source) = &spec.host_path {
            found.push(SnapshotDataSource::HostPath(source));
        }
        if let Some(source) = &spec.gluster_snapshot_volume {
            found.push(SnapshotDataSource::Gluster(source));
        }
        if let Some(source) = &spec.openebs_volume {
            found.push(SnapshotDataSource::OpenEbs(source));
        }

        match found.as_slice() {
            [source] => Ok(*source),
            [] => Err(Error::MalformedSnapshotData {
                name: self.name_any(),
                reason: "no supported volume source found".into(),
            }),
            many => Err(Error::MalformedSnapshotData {
                name: self.name_any(),
                reason: format!(
                    "expected exactly one volume source, found {}: {}",
                    many.len(),
                    many.iter()
                        .map(|s| s.type_tag())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        }
    }
}
