//! Snapshot Provisioner - PersistentVolumes restored from VolumeSnapshots
//!
//! A dynamic volume provisioner for Kubernetes. Claims annotated with a
//! VolumeSnapshot name are satisfied by restoring that snapshot through the
//! storage backend that holds it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                   Controller Loop (kube-runtime Controller)                 │
//! └──────────────────────────────────┬──────────────────────────────────────────┘
//!                                    │ Provision / Delete
//! ┌──────────────────────────────────┴──────────────────────────────────────────┐
//! │                          Snapshot Provisioner                               │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Snapshot     │  │     Restore     │  │      Identity Guard         │  │
//! │  │    Resolver     │─▶│    Dispatcher   │  │      (Delete)               │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                  │
//! │           │            ┌───────┴─────────────────────────┴───────┐          │
//! │           │            │          Plugin Registry                │          │
//! │           │            └─────────────────────────────────────────┘          │
//! ├───────────┴─────────────────────────────────────────────────────────────────┤
//! │  VolumeSnapshot / VolumeSnapshotData │           Volume Plugins              │
//! │         (record store)               │   hostPath · glusterfs · openebs      │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`provisioner`]: resolver, dispatcher, registry and the provisioner itself
//! - [`plugins`]: built-in storage backends
//! - [`crd`]: VolumeSnapshot and VolumeSnapshotData resources
//! - [`controller`]: glue that drives the provisioner from kube-runtime
//! - [`domain`]: volume sources, contracts and ports
//! - [`metrics`]: Prometheus counters
//! - [`error`]: Error types and handling

pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod plugins;
pub mod provisioner;

// Re-export commonly used types
pub use crd::{
    install_crds, wait_for_crds, SnapshotDataSource, VolumeSnapshot, VolumeSnapshotData,
    VolumeSnapshotDataSpec, VolumeSnapshotSpec,
};

pub use domain::ports::{
    DeleteOutcome, ProvisionOptions, Provisioner, ProvisioningState, RestoredVolume,
    SnapshotStore, VolumePlugin, VolumeSource,
};

pub use error::{Error, ErrorAction, ProvisionError, Result};

pub use metrics::ProvisionerMetrics;

pub use plugins::{build_registry, PluginConfig, PluginFactory};

pub use provisioner::{
    InMemorySnapshotStore, KubeSnapshotStore, PluginRegistry, RestoreDispatcher,
    SnapshotProvisioner, SnapshotResolver, PROVISIONER_ID_ANNOTATION, PROVISIONER_NAME,
    SNAPSHOT_PVC_ANNOTATION,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
