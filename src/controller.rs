//! Controller-loop driver
//!
//! Feeds claims and released volumes from `kube::runtime::Controller` into a
//! [`Provisioner`]. Queueing, backoff and watch caching belong to kube-runtime;
//! this module only translates provisioning results into requeue actions and
//! persists or removes PersistentVolume objects.

use crate::domain::ports::{DeleteOutcome, ProvisionOptions, ProvisionerRef, ProvisioningState};
use crate::error::{Error, ErrorAction, ProvisionError, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::{watcher, Controller};
use kube::{Client, Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Annotation recording which provisioner created a volume
pub const PROVISIONED_BY_ANNOTATION: &str = "pv.kubernetes.io/provisioned-by";

/// Reason of the Warning event recorded on claims that cannot be provisioned
pub const PROVISIONING_FAILED_REASON: &str = "ProvisioningFailed";

/// Requeue delay after an `InBackground` result
const IN_BACKGROUND_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue delay after a `NoChange` result
const NO_CHANGE_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue delay after a reconciler error that asks for backoff
const ERROR_REQUEUE: Duration = Duration::from_secs(15);

// =============================================================================
// Context
// =============================================================================

/// Shared state for both reconcilers
pub struct Context {
    pub client: Client,
    pub provisioner: ProvisionerRef,
    /// Name StorageClasses use to select this provisioner
    pub provisioner_name: String,
}

impl Context {
    fn reporter(&self) -> Reporter {
        Reporter {
            controller: self.provisioner_name.clone(),
            instance: None,
        }
    }
}

/// Terminal event for a claim whose provisioning finished with an error
pub fn provisioning_failed_event(err: &ProvisionError) -> Event {
    Event {
        type_: EventType::Warning,
        reason: PROVISIONING_FAILED_REASON.into(),
        note: Some(err.to_string()),
        action: "Provisioning".into(),
        secondary: None,
    }
}

/// Map a provisioning state onto a controller action
pub fn action_for(state: ProvisioningState) -> Action {
    match state {
        ProvisioningState::Finished => Action::await_change(),
        ProvisioningState::InBackground => Action::requeue(IN_BACKGROUND_REQUEUE),
        ProvisioningState::NoChange => Action::requeue(NO_CHANGE_REQUEUE),
    }
}

/// Name of the volume provisioned for a claim, derived from its UID
pub fn volume_name_for(claim: &PersistentVolumeClaim) -> Option<String> {
    claim.uid().map(|uid| format!("pvc-{}", uid))
}

/// Point a freshly provisioned volume at the claim it was made for
pub fn bind_to_claim(
    volume: &mut PersistentVolume,
    claim: &PersistentVolumeClaim,
    class_name: &str,
    provisioner_name: &str,
) {
    volume
        .annotations_mut()
        .insert(PROVISIONED_BY_ANNOTATION.to_string(), provisioner_name.to_string());
    if let Some(spec) = volume.spec.as_mut() {
        spec.claim_ref = Some(ObjectReference {
            api_version: Some("v1".into()),
            kind: Some("PersistentVolumeClaim".into()),
            name: claim.metadata.name.clone(),
            namespace: claim.metadata.namespace.clone(),
            uid: claim.metadata.uid.clone(),
            resource_version: claim.metadata.resource_version.clone(),
            ..Default::default()
        });
        spec.storage_class_name = Some(class_name.to_string());
    }
}

/// Whether a volume is released, reclaimable by deletion and ours
pub fn should_delete(volume: &PersistentVolume, provisioner_name: &str) -> bool {
    let released = volume
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some("Released");
    let reclaim_delete = volume
        .spec
        .as_ref()
        .and_then(|spec| spec.persistent_volume_reclaim_policy.as_deref())
        == Some("Delete");
    let ours = volume
        .annotations()
        .get(PROVISIONED_BY_ANNOTATION)
        .is_some_and(|name| name == provisioner_name);

    released && reclaim_delete && ours
}

// =============================================================================
// Claim Reconciler
// =============================================================================

async fn reconcile_claim(claim: Arc<PersistentVolumeClaim>, ctx: Arc<Context>) -> Result<Action> {
    let Some(spec) = claim.spec.as_ref() else {
        return Ok(Action::await_change());
    };
    if spec.volume_name.as_deref().is_some_and(|name| !name.is_empty()) {
        return Ok(Action::await_change());
    }
    let Some(class_name) = spec.storage_class_name.as_deref() else {
        return Ok(Action::await_change());
    };
    let classes: Api<StorageClass> = Api::all(ctx.client.clone());
    let Some(storage_class) = classes.get_opt(class_name).await? else {
        return Ok(Action::await_change());
    };
    if storage_class.provisioner != ctx.provisioner_name {
        return Ok(Action::await_change());
    }
    let Some(pv_name) = volume_name_for(&claim) else {
        return Ok(Action::await_change());
    };

    let volumes: Api<PersistentVolume> = Api::all(ctx.client.clone());
    if volumes.get_opt(&pv_name).await?.is_some() {
        debug!("PersistentVolume {} already exists", pv_name);
        return Ok(Action::await_change());
    }

    let options = ProvisionOptions {
        claim: (*claim).clone(),
        storage_class,
        pv_name,
    };
    match ctx.provisioner.provision(&options).await {
        Ok(mut volume) => {
            bind_to_claim(&mut volume, &claim, class_name, &ctx.provisioner_name);
            match volumes.create(&PostParams::default(), &volume).await {
                Ok(_) => info!("Persisted PersistentVolume {}", options.pv_name),
                Err(kube::Error::Api(response)) if response.code == 409 => {
                    debug!("PersistentVolume {} was created concurrently", options.pv_name);
                }
                Err(e) => return Err(e.into()),
            }
            Ok(Action::await_change())
        }
        Err(e) => {
            if e.state == ProvisioningState::Finished {
                error!(
                    "Claim {}/{} cannot be provisioned: {}",
                    claim.namespace().unwrap_or_default(),
                    claim.name_any(),
                    e
                );
                let recorder =
                    Recorder::new(ctx.client.clone(), ctx.reporter(), claim.object_ref(&()));
                if let Err(publish) = recorder.publish(provisioning_failed_event(&e)).await {
                    warn!(
                        "Failed to record event on claim {}: {}",
                        claim.name_any(),
                        publish
                    );
                }
            }
            Ok(action_for(e.state))
        }
    }
}

// =============================================================================
// Volume Reconciler
// =============================================================================

async fn reconcile_volume(volume: Arc<PersistentVolume>, ctx: Arc<Context>) -> Result<Action> {
    if !should_delete(&volume, &ctx.provisioner_name) {
        return Ok(Action::await_change());
    }

    match ctx.provisioner.delete(&volume).await? {
        DeleteOutcome::Deleted => {
            let volumes: Api<PersistentVolume> = Api::all(ctx.client.clone());
            match volumes.delete(&volume.name_any(), &DeleteParams::default()).await {
                Ok(_) => info!("Removed PersistentVolume {}", volume.name_any()),
                Err(kube::Error::Api(response)) if response.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        DeleteOutcome::Ignored { reason } => {
            debug!("Leaving PersistentVolume {} alone: {}", volume.name_any(), reason);
        }
    }
    Ok(Action::await_change())
}

fn error_policy<K>(_object: Arc<K>, err: &Error, _ctx: Arc<Context>) -> Action {
    warn!("Reconcile failed: {}", err);
    match err.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(ERROR_REQUEUE),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

// =============================================================================
// Run
// =============================================================================

/// Run the claim and volume controllers until shutdown is signalled
pub async fn run(ctx: Arc<Context>) {
    let claims: Api<PersistentVolumeClaim> = Api::all(ctx.client.clone());
    let volumes: Api<PersistentVolume> = Api::all(ctx.client.clone());

    info!("Starting controllers for provisioner {}", ctx.provisioner_name);

    let claim_controller = Controller::new(claims, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_claim, error_policy, ctx.clone())
        .for_each(|result| async move {
            if let Err(e) = result {
                debug!("Claim reconcile error: {}", e);
            }
        });

    let volume_controller = Controller::new(volumes, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_volume, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                debug!("Volume reconcile error: {}", e);
            }
        });

    futures::join!(claim_controller, volume_controller);
    info!("Controllers stopped");
}
