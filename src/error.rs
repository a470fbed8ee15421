//! Error types for the Snapshot Provisioner
//!
//! Provides structured error types for snapshot resolution, restore dispatch,
//! backend plugins and the controller-loop glue.

use crate::domain::ports::ProvisioningState;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Invalid provisioning request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Snapshot Resolution Errors
    // =========================================================================
    #[error("failed to retrieve VolumeSnapshot {name} in namespace {namespace}: {source}")]
    SnapshotLookup {
        namespace: String,
        name: String,
        source: Box<Error>,
    },

    #[error("VolumeSnapshot {name} in namespace {namespace} is not bound to any VolumeSnapshotData")]
    SnapshotNotBound { namespace: String, name: String },

    #[error("failed to retrieve VolumeSnapshotData {name}: {source}")]
    SnapshotDataLookup { name: String, source: Box<Error> },

    // =========================================================================
    // Dispatch Errors
    // =========================================================================
    #[error("Malformed VolumeSnapshotData {name}: {reason}")]
    MalformedSnapshotData { name: String, reason: String },

    #[error("Unsupported volume source on PersistentVolume {name}: {reason}")]
    UnsupportedVolumeSource { name: String, reason: String },

    #[error("{volume_type} is not a supported volume type for {object}")]
    PluginNotRegistered { volume_type: String, object: String },

    #[error("{plugin} plugin failed to {operation} {object}: {source}")]
    PluginFailed {
        plugin: String,
        operation: String,
        object: String,
        source: Box<Error>,
    },

    #[error("failed to create a PersistentVolume from snapshot {snapshot}: {source}")]
    RestoreFailed { snapshot: String, source: Box<Error> },

    // =========================================================================
    // Deletion Errors
    // =========================================================================
    #[error("identity annotation not found on PersistentVolume {name}")]
    MissingIdentity { name: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Binding completes asynchronously, poll slowly
            Error::SnapshotNotBound { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Request or descriptor problems won't fix themselves
            Error::InvalidRequest(_)
            | Error::Configuration(_)
            | Error::MalformedSnapshotData { .. }
            | Error::UnsupportedVolumeSource { .. }
            | Error::PluginNotRegistered { .. }
            | Error::MissingIdentity { .. }
            | Error::JsonParse(_) => ErrorAction::NoRequeue,

            // Wrappers inherit from the plugin-level cause, but a plugin
            // failure is never downgraded to permanent
            Error::PluginFailed { .. } => ErrorAction::RequeueWithBackoff,
            Error::RestoreFailed { source, .. } => match source.action() {
                ErrorAction::NoRequeue => ErrorAction::NoRequeue,
                _ => ErrorAction::RequeueWithBackoff,
            },

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Http(_) | Error::ResourceNotFound { .. } | Error::Io(_)
        )
    }

    /// Whether this error means the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;

/// A failed `Provision` call, carrying the state reported to the controller loop.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct ProvisionError {
    /// What the controller loop should do next
    pub state: ProvisioningState,
    #[source]
    pub source: Error,
}

impl ProvisionError {
    pub fn new(state: ProvisioningState, source: Error) -> Self {
        Self { state, source }
    }

    /// Terminal failure, the claim should not be retried
    pub fn finished(source: Error) -> Self {
        Self::new(ProvisioningState::Finished, source)
    }

    /// Retryable failure, retry later without a user-visible event
    pub fn in_background(source: Error) -> Self {
        Self::new(ProvisioningState::InBackground, source)
    }

    /// Retryable failure where nothing changed since the last attempt
    pub fn no_change(source: Error) -> Self {
        Self::new(ProvisioningState::NoChange, source)
    }
}
