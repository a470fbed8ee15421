//! Snapshot Restore Provisioner
//!
//! The core of the crate: resolves a claim's snapshot reference, dispatches
//! the restore to the right backend plugin and guards deletion by identity.

pub mod dispatcher;
pub mod registry;
pub mod resolver;
pub mod snapshot;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::*;
pub use registry::*;
pub use resolver::*;
pub use snapshot::*;
pub use store::*;

/// Name this provisioner registers under in StorageClasses
pub const PROVISIONER_NAME: &str = "volumesnapshot.external-storage.k8s.io/snapshot-promoter";

/// Claim annotation naming the VolumeSnapshot to restore
pub const SNAPSHOT_PVC_ANNOTATION: &str = "snapshot.alpha.kubernetes.io/snapshot";

/// Volume annotation carrying the identity of the provisioner that created it
pub const PROVISIONER_ID_ANNOTATION: &str = "snapshotProvisionerIdentity";
