//! Restore Dispatcher
//!
//! Picks the plugin for a VolumeSnapshotData by the shape of its source and
//! asks it to materialize a volume.

use super::registry::PluginRegistry;
use crate::crd::VolumeSnapshotData;
use crate::domain::ports::RestoredVolume;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Routes restore requests to the registered backend plugin
#[derive(Clone)]
pub struct RestoreDispatcher {
    registry: Arc<PluginRegistry>,
}

impl RestoreDispatcher {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Restore `data` into a new volume named `pv_name`.
    ///
    /// Malformed descriptors and unregistered backends fail before any plugin
    /// runs. Plugin failures come back as [`Error::PluginFailed`], which is
    /// always retryable.
    pub async fn dispatch(
        &self,
        data: &VolumeSnapshotData,
        claim: &PersistentVolumeClaim,
        pv_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<RestoredVolume> {
        let data_name = data.name_any();
        let volume_type = data.source()?.type_tag();

        let plugin = self
            .registry
            .lookup(volume_type)
            .ok_or_else(|| Error::PluginNotRegistered {
                volume_type: volume_type.to_string(),
                object: format!("VolumeSnapshotData {}", data_name),
            })?;

        match plugin.restore(data, claim, pv_name, parameters).await {
            Ok(restored) => {
                info!(
                    "Restored VolumeSnapshotData {} into {} via {}",
                    data_name, pv_name, volume_type
                );
                Ok(restored)
            }
            Err(e) => {
                warn!(
                    "Failed to restore VolumeSnapshotData {} via {}: {}",
                    data_name, volume_type, e
                );
                Err(Error::PluginFailed {
                    plugin: volume_type.to_string(),
                    operation: "restore".into(),
                    object: format!("VolumeSnapshotData {}", data_name),
                    source: Box::new(e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GlusterSnapshotSource, HostPathSnapshotSource, VolumeSnapshotDataSpec};
    use crate::provisioner::testing::{claim, host_path_data, FakePlugin};
    use assert_matches::assert_matches;

    fn dispatcher_with(plugin: Arc<FakePlugin>) -> RestoreDispatcher {
        let registry = PluginRegistry::new().with_plugin(plugin).unwrap();
        RestoreDispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_dispatches_to_matching_plugin() {
        let plugin = Arc::new(FakePlugin::new("hostPath").with_label("restored", "true"));
        let gluster = Arc::new(FakePlugin::new("glusterfs"));
        let openebs = Arc::new(FakePlugin::new("openebs"));
        let registry = PluginRegistry::new()
            .with_plugin(plugin.clone())
            .unwrap()
            .with_plugin(gluster.clone())
            .unwrap()
            .with_plugin(openebs.clone())
            .unwrap();
        let dispatcher = RestoreDispatcher::new(Arc::new(registry));

        let restored = dispatcher
            .dispatch(
                &host_path_data("data1", "/exports/snap1"),
                &claim("ns", "c1", Some("snap1")),
                "pv-c1",
                &BTreeMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(plugin.restore_calls(), 1);
        assert_eq!(gluster.restore_calls(), 0);
        assert_eq!(openebs.restore_calls(), 0);
        assert_eq!(restored.labels.get("restored").map(String::as_str), Some("true"));
        assert_eq!(plugin.last_pv_name().as_deref(), Some("pv-c1"));
    }

    #[tokio::test]
    async fn test_forwards_parameters() {
        let plugin = Arc::new(FakePlugin::new("hostPath"));
        let dispatcher = dispatcher_with(plugin.clone());
        let mut parameters = BTreeMap::new();
        parameters.insert("replicas".to_string(), "3".to_string());

        dispatcher
            .dispatch(
                &host_path_data("data1", "/exports/snap1"),
                &claim("ns", "c1", Some("snap1")),
                "pv-c1",
                &parameters,
            )
            .await
            .unwrap();

        assert_eq!(plugin.last_parameters(), Some(parameters));
    }

    #[tokio::test]
    async fn test_malformed_data_never_reaches_plugin() {
        let plugin = Arc::new(FakePlugin::new("hostPath"));
        let dispatcher = dispatcher_with(plugin.clone());

        let empty = VolumeSnapshotData::new("data1", VolumeSnapshotDataSpec::default());
        let double = VolumeSnapshotData::new(
            "data2",
            VolumeSnapshotDataSpec {
                host_path: Some(HostPathSnapshotSource {
                    path: "/exports/snap1".into(),
                }),
                gluster_snapshot_volume: Some(GlusterSnapshotSource {
                    snapshot_id: "g1".into(),
                }),
                ..Default::default()
            },
        );

        for data in [empty, double] {
            let err = dispatcher
                .dispatch(&data, &claim("ns", "c1", Some("snap1")), "pv-c1", &BTreeMap::new())
                .await
                .unwrap_err();
            assert_matches!(err, Error::MalformedSnapshotData { .. });
        }
        assert_eq!(plugin.restore_calls(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_backend_never_reaches_plugin() {
        let plugin = Arc::new(FakePlugin::new("openebs"));
        let dispatcher = dispatcher_with(plugin.clone());

        let err = dispatcher
            .dispatch(
                &host_path_data("data1", "/exports/snap1"),
                &claim("ns", "c1", Some("snap1")),
                "pv-c1",
                &BTreeMap::new(),
            )
            .await
            .unwrap_err();

        assert_matches!(err, Error::PluginNotRegistered { ref volume_type, .. } if volume_type == "hostPath");
        assert_eq!(plugin.restore_calls(), 0);
    }

    #[tokio::test]
    async fn test_plugin_failure_is_retryable() {
        let plugin = Arc::new(FakePlugin::new("hostPath").failing());
        let dispatcher = dispatcher_with(plugin.clone());

        let err = dispatcher
            .dispatch(
                &host_path_data("data1", "/exports/snap1"),
                &claim("ns", "c1", Some("snap1")),
                "pv-c1",
                &BTreeMap::new(),
            )
            .await
            .unwrap_err();

        assert_matches!(err, Error::PluginFailed { ref operation, .. } if operation == "restore");
        assert!(err.is_retryable());
        assert_eq!(plugin.restore_calls(), 1);
    }
}
