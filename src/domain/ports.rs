//! Domain Ports - Core trait definitions for the snapshot provisioner
//!
//! These traits define the boundaries between the restore logic and external
//! systems: the record store holding snapshot records, the storage backends
//! that materialize volumes, and the controller loop that drives provisioning.

use crate::crd::{VolumeSnapshot, VolumeSnapshotData};
use crate::error::{Error, ProvisionError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    GlusterfsPersistentVolumeSource, HostPathVolumeSource, ISCSIPersistentVolumeSource,
    PersistentVolume, PersistentVolumeClaim, PersistentVolumeSpec,
};
use k8s_openapi::api::storage::v1::StorageClass;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Volume Types
// =============================================================================

/// Backend tags, shared by snapshot data sources and volume sources
pub mod volume_type {
    /// Local path on a node
    pub const HOST_PATH: &str = "hostPath";
    /// GlusterFS network filesystem
    pub const GLUSTERFS: &str = "glusterfs";
    /// OpenEBS replicated block storage, exposed over iSCSI
    pub const OPENEBS: &str = "openebs";
}

// =============================================================================
// Volume Source
// =============================================================================

/// A concrete, restorable volume produced by a backend plugin
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeSource {
    HostPath(HostPathVolumeSource),
    Glusterfs(GlusterfsPersistentVolumeSource),
    Iscsi(ISCSIPersistentVolumeSource),
}

impl VolumeSource {
    /// Backend tag of the plugin that owns this source
    pub fn type_tag(&self) -> &'static str {
        match self {
            VolumeSource::HostPath(_) => volume_type::HOST_PATH,
            VolumeSource::Glusterfs(_) => volume_type::GLUSTERFS,
            VolumeSource::Iscsi(_) => volume_type::OPENEBS,
        }
    }

    /// Write this source into a PersistentVolume spec
    pub fn apply_to(self, spec: &mut PersistentVolumeSpec) {
        match self {
            VolumeSource::HostPath(source) => spec.host_path = Some(source),
            VolumeSource::Glusterfs(source) => spec.glusterfs = Some(source),
            VolumeSource::Iscsi(source) => spec.iscsi = Some(source),
        }
    }

    /// Derive the single supported source of an existing PersistentVolume
    pub fn from_volume(volume: &PersistentVolume) -> Result<Self> {
        let name = volume.metadata.name.clone().unwrap_or_default();
        let spec = volume
            .spec
            .as_ref()
            .ok_or_else(|| Error::UnsupportedVolumeSource {
                name: name.clone(),
                reason: "volume has no spec".into(),
            })?;

        let mut found = Vec::with_capacity(1);
        if let Some(source) = &spec.host_path {
            found.push(VolumeSource::HostPath(source.clone()));
        }
        if let Some(source) = &spec.glusterfs {
            found.push(VolumeSource::Glusterfs(source.clone()));
        }
        if let Some(source) = &spec.iscsi {
            found.push(VolumeSource::Iscsi(source.clone()));
        }

        if found.len() != 1 {
            return Err(Error::UnsupportedVolumeSource {
                name,
                reason: format!(
                    "expected exactly one supported volume source, found {}",
                    found.len()
                ),
            });
        }
        Ok(found.remove(0))
    }
}

/// Result of a successful plugin restore
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredVolume {
    /// Source to embed into the new PersistentVolume
    pub source: VolumeSource,
    /// Labels to add to the new PersistentVolume
    pub labels: BTreeMap<String, String>,
}

impl RestoredVolume {
    pub fn new(source: VolumeSource) -> Self {
        Self {
            source,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Provisioning Contract
// =============================================================================

/// Input of a single `Provision` call
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Claim requesting the volume
    pub claim: PersistentVolumeClaim,
    /// Storage class named by the claim
    pub storage_class: StorageClass,
    /// Name the new PersistentVolume must carry
    pub pv_name: String,
}

impl ProvisionOptions {
    /// Free-form backend parameters of the storage class
    pub fn parameters(&self) -> BTreeMap<String, String> {
        self.storage_class.parameters.clone().unwrap_or_default()
    }
}

/// State reported back to the controller loop after `Provision`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningState {
    /// Terminal: success, or a failure that must not be retried
    Finished,
    /// Retryable: call again later without a user-visible failure yet
    InBackground,
    /// Retryable: nothing changed since the last attempt
    NoChange,
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningState::Finished => write!(f, "finished"),
            ProvisioningState::InBackground => write!(f, "in_background"),
            ProvisioningState::NoChange => write!(f, "no_change"),
        }
    }
}

/// Result of a `Delete` call that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The owning plugin removed the backing storage
    Deleted,
    /// The volume belongs to another provisioner instance and was left alone
    Ignored { reason: String },
}

// =============================================================================
// Volume Plugin Port
// =============================================================================

/// Port for a storage backend able to restore snapshots into volumes
#[async_trait]
pub trait VolumePlugin: Send + Sync {
    /// Stable backend tag this plugin is registered under
    fn type_tag(&self) -> &str;

    /// Materialize a new volume from snapshot data
    async fn restore(
        &self,
        data: &VolumeSnapshotData,
        claim: &PersistentVolumeClaim,
        pv_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<RestoredVolume>;

    /// Remove the backing storage of a volume this plugin restored
    async fn delete(&self, volume: &PersistentVolume) -> Result<()>;
}

// =============================================================================
// Snapshot Store Port
// =============================================================================

/// Port for reading snapshot records
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Fetch a VolumeSnapshot by namespace and name
    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<VolumeSnapshot>;

    /// Fetch a cluster-scoped VolumeSnapshotData by name
    async fn get_snapshot_data(&self, name: &str) -> Result<VolumeSnapshotData>;
}

// =============================================================================
// Provisioner Port
// =============================================================================

/// Contract consumed by the controller loop
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a PersistentVolume for a claim. Success always means `Finished`.
    async fn provision(
        &self,
        options: &ProvisionOptions,
    ) -> std::result::Result<PersistentVolume, ProvisionError>;

    /// Tear down the storage behind a PersistentVolume
    async fn delete(&self, volume: &PersistentVolume) -> Result<DeleteOutcome>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type VolumePluginRef = Arc<dyn VolumePlugin>;
pub type SnapshotStoreRef = Arc<dyn SnapshotStore>;
pub type ProvisionerRef = Arc<dyn Provisioner>;
