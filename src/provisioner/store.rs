//! Snapshot record stores
//!
//! [`KubeSnapshotStore`] reads the snapshot CRDs from the API server;
//! [`InMemorySnapshotStore`] holds records in memory for tests and embedders.

use crate::crd::{VolumeSnapshot, VolumeSnapshotData};
use crate::domain::ports::SnapshotStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::Api;
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

// =============================================================================
// Kubernetes Store
// =============================================================================

/// Reads VolumeSnapshot and VolumeSnapshotData through the Kubernetes API
#[derive(Clone)]
pub struct KubeSnapshotStore {
    client: Client,
}

impl KubeSnapshotStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Turn a 404 into `ResourceNotFound` so callers see which record was missing
fn lookup_error(err: kube::Error, kind: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 404 => Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        other => Error::Kube(other),
    }
}

#[async_trait]
impl SnapshotStore for KubeSnapshotStore {
    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<VolumeSnapshot> {
        let api: Api<VolumeSnapshot> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| lookup_error(e, "VolumeSnapshot", &format!("{}/{}", namespace, name)))
    }

    async fn get_snapshot_data(&self, name: &str) -> Result<VolumeSnapshotData> {
        let api: Api<VolumeSnapshotData> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| lookup_error(e, "VolumeSnapshotData", name))
    }
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Snapshot records kept in memory
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<BTreeMap<(String, String), VolumeSnapshot>>,
    data: RwLock<BTreeMap<String, VolumeSnapshotData>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a snapshot, keyed by its namespace and name
    pub async fn insert_snapshot(&self, snapshot: VolumeSnapshot) {
        let key = (snapshot.namespace().unwrap_or_default(), snapshot.name_any());
        self.snapshots.write().await.insert(key, snapshot);
    }

    /// Insert or replace a snapshot data record, keyed by name
    pub async fn insert_snapshot_data(&self, data: VolumeSnapshotData) {
        self.data.write().await.insert(data.name_any(), data);
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<VolumeSnapshot> {
        self.snapshots
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "VolumeSnapshot".into(),
                name: format!("{}/{}", namespace, name),
            })
    }

    async fn get_snapshot_data(&self, name: &str) -> Result<VolumeSnapshotData> {
        self.data
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "VolumeSnapshotData".into(),
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::testing::{host_path_data, snapshot};
    use kube::core::ErrorResponse;

    #[tokio::test]
    async fn test_in_memory_lookup() {
        let store = InMemorySnapshotStore::new();
        store.insert_snapshot(snapshot("ns", "snap1", "data1")).await;
        store
            .insert_snapshot_data(host_path_data("data1", "/exports/snap1"))
            .await;

        let found = store.get_snapshot("ns", "snap1").await.unwrap();
        assert_eq!(found.spec.snapshot_data_name, "data1");
        assert!(store.get_snapshot_data("data1").await.is_ok());

        let err = store.get_snapshot("ns", "missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Resource not found: VolumeSnapshot/ns/missing");
    }

    #[test]
    fn test_lookup_error_mapping() {
        let not_found = kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "not found".into(),
            reason: "NotFound".into(),
            code: 404,
        });
        assert!(matches!(
            lookup_error(not_found, "VolumeSnapshotData", "data1"),
            Error::ResourceNotFound { .. }
        ));

        let forbidden = kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "forbidden".into(),
            reason: "Forbidden".into(),
            code: 403,
        });
        assert!(matches!(
            lookup_error(forbidden, "VolumeSnapshotData", "data1"),
            Error::Kube(_)
        ));
    }
}
