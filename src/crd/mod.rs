//! Custom Resource Definitions for snapshot restore
//!
//! This module contains the snapshot CRD types and their bootstrap:
//! - VolumeSnapshot: namespaced, user-facing snapshot name
//! - VolumeSnapshotData: cluster-scoped, backend-specific snapshot descriptor

pub mod install;
pub mod volume_snapshot;

pub use install::*;
pub use volume_snapshot::*;
