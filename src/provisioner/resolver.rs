//! Snapshot Metadata Resolver
//!
//! Two-step lookup from a snapshot name to its bound data record. Nothing is
//! cached; every Provision attempt re-reads both records.

use crate::crd::VolumeSnapshotData;
use crate::domain::ports::SnapshotStoreRef;
use crate::error::{Error, Result};
use tracing::debug;

/// Resolves VolumeSnapshot names into VolumeSnapshotData records
#[derive(Clone)]
pub struct SnapshotResolver {
    store: SnapshotStoreRef,
}

impl SnapshotResolver {
    pub fn new(store: SnapshotStoreRef) -> Self {
        Self { store }
    }

    /// Resolve `name` in `namespace` to the data record it is bound to.
    ///
    /// Every failure is retryable: [`Error::SnapshotLookup`] and
    /// [`Error::SnapshotDataLookup`] when a record cannot be read,
    /// [`Error::SnapshotNotBound`] while binding is still pending.
    pub async fn resolve(&self, name: &str, namespace: &str) -> Result<VolumeSnapshotData> {
        let snapshot = self
            .store
            .get_snapshot(namespace, name)
            .await
            .map_err(|e| Error::SnapshotLookup {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source: Box::new(e),
            })?;

        let data_name = snapshot
            .bound_data_name()
            .ok_or_else(|| Error::SnapshotNotBound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let data = self
            .store
            .get_snapshot_data(data_name)
            .await
            .map_err(|e| Error::SnapshotDataLookup {
                name: data_name.to_string(),
                source: Box::new(e),
            })?;

        debug!("Resolved VolumeSnapshot {}/{} to {}", namespace, name, data_name);
        Ok(data)
    }
}
