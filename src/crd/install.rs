//! CRD bootstrap
//!
//! Registers the snapshot CustomResourceDefinitions and waits until the API
//! server serves them.

use super::volume_snapshot::{VolumeSnapshot, VolumeSnapshotData};
use crate::error::{Error, Result};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, JSONSchemaProps,
};
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, CustomResourceExt};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Interval between readiness probes
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for the snapshot data resource to be served
const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Mark an object schema, and every object nested under its properties, as
/// keeping fields the Rust types don't model.
fn preserve_unknown_fields(schema: &mut JSONSchemaProps) {
    if schema.type_.as_deref() == Some("object") {
        schema.x_kubernetes_preserve_unknown_fields = Some(true);
    }
    if let Some(properties) = schema.properties.as_mut() {
        for property in properties.values_mut() {
            preserve_unknown_fields(property);
        }
    }
}

/// The snapshot CRDs as installed. Other controllers write backend sources
/// and status fields these types don't know about; the API server must not
/// prune them.
pub fn snapshot_crds() -> Vec<CustomResourceDefinition> {
    let mut crds = vec![VolumeSnapshotData::crd(), VolumeSnapshot::crd()];
    for crd in crds.iter_mut() {
        for version in crd.spec.versions.iter_mut() {
            let schema = version
                .schema
                .get_or_insert_with(Default::default)
                .open_api_v3_schema
                .get_or_insert_with(|| JSONSchemaProps {
                    type_: Some("object".into()),
                    ..Default::default()
                });
            preserve_unknown_fields(schema);
        }
    }
    crds
}

/// Create both snapshot CRDs, treating "already exists" as success.
pub async fn install_crds(client: Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);

    for crd in snapshot_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        match crds.create(&PostParams::default(), &crd).await {
            Ok(_) => info!("Created CustomResourceDefinition {}", name),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                debug!("CustomResourceDefinition {} already exists", name);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Poll until the VolumeSnapshotData resource can be listed.
pub async fn wait_for_crds(client: Client) -> Result<()> {
    let data: Api<VolumeSnapshotData> = Api::all(client);
    let deadline = Instant::now() + WAIT_TIMEOUT;

    loop {
        match data.list(&ListParams::default().limit(1)).await {
            Ok(_) => {
                info!("Snapshot resources are being served");
                return Ok(());
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                if Instant::now() >= deadline {
                    return Err(Error::Configuration(format!(
                        "snapshot resources not served after {:?}",
                        WAIT_TIMEOUT
                    )));
                }
                sleep(POLL_INTERVAL).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::volume_snapshot::{GROUP, VOLUME_SNAPSHOT_DATA_PLURAL, VOLUME_SNAPSHOT_PLURAL};

    #[test]
    fn test_crd_names_and_scope() {
        let data = VolumeSnapshotData::crd();
        assert_eq!(
            data.metadata.name.as_deref(),
            Some(format!("{}.{}", VOLUME_SNAPSHOT_DATA_PLURAL, GROUP).as_str())
        );
        assert_eq!(data.spec.scope, "Cluster");

        let snapshot = VolumeSnapshot::crd();
        assert_eq!(
            snapshot.metadata.name.as_deref(),
            Some(format!("{}.{}", VOLUME_SNAPSHOT_PLURAL, GROUP).as_str())
        );
        assert_eq!(snapshot.spec.scope, "Namespaced");
    }

    #[test]
    fn test_installed_crds_keep_unknown_fields() {
        let crds = snapshot_crds();
        assert_eq!(crds.len(), 2);

        for crd in &crds {
            for version in &crd.spec.versions {
                let schema = version
                    .schema
                    .as_ref()
                    .and_then(|s| s.open_api_v3_schema.as_ref())
                    .unwrap();
                assert_eq!(schema.x_kubernetes_preserve_unknown_fields, Some(true));

                let spec = &schema.properties.as_ref().unwrap()["spec"];
                assert_eq!(spec.x_kubernetes_preserve_unknown_fields, Some(true));
            }
        }
    }
}
