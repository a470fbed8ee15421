//! GlusterFS Volume Plugin
//!
//! Restores GlusterFS snapshots by cloning them into a new gluster volume
//! named after the PersistentVolume, driven through the `gluster` CLI.

use crate::crd::{SnapshotDataSource, VolumeSnapshotData};
use crate::domain::ports::{volume_type, RestoredVolume, VolumePlugin, VolumeSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    GlusterfsPersistentVolumeSource, PersistentVolume, PersistentVolumeClaim,
};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// StorageClass parameter overriding the endpoints object name
pub const ENDPOINT_PARAMETER: &str = "endpoint";

// =============================================================================
// Command Runner
// =============================================================================

/// Runs external commands on behalf of the plugin
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning stdout on a zero exit status
    async fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Runs commands as child processes
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        debug!("Running {} {}", program, args.join(" "));
        let output = Command::new(program).args(args).output().await?;
        if !output.status.success() {
            return Err(Error::BackendOperationFailed {
                backend: volume_type::GLUSTERFS.into(),
                operation: args.iter().take(3).cloned().collect::<Vec<_>>().join(" "),
                reason: format!(
                    "{} exited with {}: {}",
                    program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the GlusterFS plugin
#[derive(Debug, Clone)]
pub struct GlusterConfig {
    /// Path of the gluster CLI
    pub binary: String,
    /// Endpoints object used when the StorageClass doesn't name one
    pub default_endpoint: String,
}

impl Default for GlusterConfig {
    fn default() -> Self {
        Self {
            binary: "gluster".to_string(),
            default_endpoint: "glusterfs-cluster".to_string(),
        }
    }
}

// =============================================================================
// GlusterFS Plugin
// =============================================================================

/// Plugin for GlusterFS volume snapshots
pub struct GlusterPlugin {
    config: GlusterConfig,
    runner: Arc<dyn CommandRunner>,
}

impl GlusterPlugin {
    pub fn new(config: GlusterConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    pub fn with_runner(config: GlusterConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    async fn gluster(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["--mode=script".to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        self.runner.run(&self.config.binary, &full).await
    }
}

#[async_trait]
impl VolumePlugin for GlusterPlugin {
    fn type_tag(&self) -> &str {
        volume_type::GLUSTERFS
    }

    async fn restore(
        &self,
        data: &VolumeSnapshotData,
        claim: &PersistentVolumeClaim,
        pv_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<RestoredVolume> {
        let snapshot_id = match data.source()? {
            SnapshotDataSource::Gluster(source) => source.snapshot_id.clone(),
            other => {
                return Err(Error::BackendOperationFailed {
                    backend: volume_type::GLUSTERFS.into(),
                    operation: "restore".into(),
                    reason: format!("cannot restore a {} snapshot", other.type_tag()),
                })
            }
        };

        self.gluster(&["snapshot", "clone", pv_name, snapshot_id.as_str()]).await?;
        if let Err(e) = self.gluster(&["volume", "start", pv_name]).await {
            warn!("Starting clone {} failed, removing it: {}", pv_name, e);
            if let Err(cleanup) = self.gluster(&["volume", "delete", pv_name]).await {
                warn!("Failed to remove clone {}: {}", pv_name, cleanup);
            }
            return Err(e);
        }
        info!("Cloned gluster snapshot {} into volume {}", snapshot_id, pv_name);

        let endpoints = parameters
            .get(ENDPOINT_PARAMETER)
            .cloned()
            .unwrap_or_else(|| self.config.default_endpoint.clone());

        Ok(RestoredVolume::new(VolumeSource::Glusterfs(
            GlusterfsPersistentVolumeSource {
                endpoints,
                endpoints_namespace: claim.namespace(),
                path: pv_name.to_string(),
                read_only: None,
            },
        )))
    }

    async fn delete(&self, volume: &PersistentVolume) -> Result<()> {
        let path = volume
            .spec
            .as_ref()
            .and_then(|spec| spec.glusterfs.as_ref())
            .map(|source| source.path.clone())
            .ok_or_else(|| Error::BackendOperationFailed {
                backend: volume_type::GLUSTERFS.into(),
                operation: "delete".into(),
                reason: format!("{} is not a glusterfs volume", volume.name_any()),
            })?;

        self.gluster(&["volume", "stop", path.as_str(), "force"]).await?;
        self.gluster(&["volume", "delete", path.as_str()]).await?;
        info!("Deleted gluster volume {}", path);
        Ok(())
    }
}
