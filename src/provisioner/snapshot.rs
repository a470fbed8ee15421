//! Snapshot Provisioner
//!
//! Orchestrates resolve → dispatch, assembles the PersistentVolume and guards
//! deletion by the identity annotation stamped at creation.

use super::dispatcher::RestoreDispatcher;
use super::registry::PluginRegistry;
use super::resolver::SnapshotResolver;
use super::{PROVISIONER_ID_ANNOTATION, SNAPSHOT_PVC_ANNOTATION};
use crate::domain::ports::{
    DeleteOutcome, ProvisionOptions, Provisioner, ProvisioningState, RestoredVolume,
    SnapshotStoreRef, VolumeSource,
};
use crate::error::{Error, ProvisionError, Result};
use crate::metrics::ProvisionerMetrics;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reclaim policy the API server applies to classes that don't set one
const DEFAULT_RECLAIM_POLICY: &str = "Delete";

// =============================================================================
// Snapshot Provisioner
// =============================================================================

/// Provisions PersistentVolumes by restoring VolumeSnapshots
pub struct SnapshotProvisioner {
    /// Identity stamped on, and required of, every volume this instance owns
    identity: String,
    registry: Arc<PluginRegistry>,
    resolver: SnapshotResolver,
    dispatcher: RestoreDispatcher,
    metrics: ProvisionerMetrics,
}

impl SnapshotProvisioner {
    pub fn new(
        identity: impl Into<String>,
        store: SnapshotStoreRef,
        registry: Arc<PluginRegistry>,
        metrics: ProvisionerMetrics,
    ) -> Self {
        Self {
            identity: identity.into(),
            resolver: SnapshotResolver::new(store),
            dispatcher: RestoreDispatcher::new(registry.clone()),
            registry,
            metrics,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    async fn provision_volume(
        &self,
        options: &ProvisionOptions,
    ) -> std::result::Result<PersistentVolume, ProvisionError> {
        let claim = &options.claim;
        let claim_spec = claim.spec.clone().unwrap_or_default();

        if claim_spec.selector.is_some() {
            return Err(ProvisionError::finished(Error::InvalidRequest(
                "claim Selector is not supported".into(),
            )));
        }

        let snapshot_name = claim
            .annotations()
            .get(SNAPSHOT_PVC_ANNOTATION)
            .cloned()
            .ok_or_else(|| {
                ProvisionError::finished(Error::InvalidRequest(
                    "snapshot annotation not found on PVC".into(),
                ))
            })?;

        let storage = claim_spec
            .resources
            .as_ref()
            .and_then(|r| r.requests.as_ref())
            .and_then(|requests| requests.get("storage"))
            .cloned()
            .ok_or_else(|| {
                ProvisionError::finished(Error::InvalidRequest(format!(
                    "claim {} has no storage request",
                    claim.name_any()
                )))
            })?;

        let namespace = claim.namespace().unwrap_or_default();
        let data = self
            .resolver
            .resolve(&snapshot_name, &namespace)
            .await
            .map_err(|e| match e {
                Error::SnapshotNotBound { .. } => ProvisionError::no_change(e),
                other => ProvisionError::in_background(other),
            })?;
        debug!("Restoring PersistentVolume {} from {}", options.pv_name, data.name_any());

        let RestoredVolume { source, labels } = self
            .dispatcher
            .dispatch(&data, claim, &options.pv_name, &options.parameters())
            .await
            .map_err(|e| {
                ProvisionError::in_background(Error::RestoreFailed {
                    snapshot: snapshot_name.clone(),
                    source: Box::new(e),
                })
            })?;

        let mut spec = PersistentVolumeSpec {
            persistent_volume_reclaim_policy: Some(
                options
                    .storage_class
                    .reclaim_policy
                    .clone()
                    .unwrap_or_else(|| DEFAULT_RECLAIM_POLICY.to_string()),
            ),
            access_modes: claim_spec.access_modes.clone(),
            capacity: Some(BTreeMap::from([("storage".to_string(), storage)])),
            ..Default::default()
        };
        source.apply_to(&mut spec);

        let mut volume = PersistentVolume {
            metadata: ObjectMeta {
                name: Some(options.pv_name.clone()),
                annotations: Some(BTreeMap::from([(
                    PROVISIONER_ID_ANNOTATION.to_string(),
                    self.identity.clone(),
                )])),
                ..Default::default()
            },
            spec: Some(spec),
            status: None,
        };

        if !labels.is_empty() {
            let existing = volume.labels_mut();
            for (key, value) in labels {
                existing.entry(key).or_insert(value);
            }
        }

        info!(
            "Created PersistentVolume {} from snapshot {}/{}",
            options.pv_name, namespace, snapshot_name
        );
        Ok(volume)
    }

    async fn delete_volume(&self, volume: &PersistentVolume) -> Result<DeleteOutcome> {
        let name = volume.name_any();
        let identity = volume
            .annotations()
            .get(PROVISIONER_ID_ANNOTATION)
            .ok_or_else(|| Error::MissingIdentity { name: name.clone() })?;

        if identity != &self.identity {
            debug!(
                "Ignoring PersistentVolume {} owned by provisioner {}",
                name, identity
            );
            return Ok(DeleteOutcome::Ignored {
                reason: "identity annotation on PV does not match ours".into(),
            });
        }

        let volume_type = VolumeSource::from_volume(volume)?.type_tag();
        let plugin = self
            .registry
            .lookup(volume_type)
            .ok_or_else(|| Error::PluginNotRegistered {
                volume_type: volume_type.to_string(),
                object: format!("PersistentVolume {}", name),
            })?;

        plugin.delete(volume).await?;
        info!("Deleted PersistentVolume {} via {}", name, volume_type);
        Ok(DeleteOutcome::Deleted)
    }
}

#[async_trait]
impl Provisioner for SnapshotProvisioner {
    async fn provision(
        &self,
        options: &ProvisionOptions,
    ) -> std::result::Result<PersistentVolume, ProvisionError> {
        let result = self.provision_volume(options).await;
        match &result {
            Ok(_) => self.metrics.record_provision(ProvisioningState::Finished, true),
            Err(e) => {
                warn!(
                    "Provisioning {} for claim {} failed ({}): {}",
                    options.pv_name,
                    options.claim.name_any(),
                    e.state,
                    e
                );
                self.metrics.record_provision(e.state, false);
            }
        }
        result
    }

    async fn delete(&self, volume: &PersistentVolume) -> Result<DeleteOutcome> {
        let result = self.delete_volume(volume).await;
        match &result {
            Ok(DeleteOutcome::Deleted) => self.metrics.record_delete("deleted"),
            Ok(DeleteOutcome::Ignored { .. }) => self.metrics.record_delete("ignored"),
            Err(_) => self.metrics.record_delete("error"),
        }
        result
    }
}
