//! Reconciliation logic for HelloWorld resources.
//!
//! Each HelloWorld owns exactly one echo Pod. A reconcile pass reads the
//! owner and its Pod, compares the Pod against the desired template and
//! performs at most one Pod write:
//! - `pod_template`: builds the desired Pod
//! - `differ`: classifies the observed Pod as absent, equivalent or drifted
//! - `status`: status subresource helpers
//!
//! A drifted Pod is deleted and recreated on a later pass, never replaced
//! within the same pass. The reconciler holds no state between passes.

pub mod differ;
pub mod pod_template;
pub mod status;


use crate::cluster::ClusterClient;
use crate::error::{ClusterError, ControllerError};
use crate::events::{EventPublisher, actions, reasons};
use crate::metrics::{Metrics, ops};
use crds::{HelloWorld, HelloWorldState};
use differ::{PodState, classify};
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use kube::runtime::events::EventType;
use kube_runtime::controller::Action;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before re-checking after a delete or a raced create
pub const SHORT_REQUEUE: Duration = Duration::from_secs(2);

/// Namespaced name of a HelloWorld
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HelloWorldKey {
    /// Namespace of the HelloWorld
    pub namespace: String,
    /// Name of the HelloWorld
    pub name: String,
}

impl HelloWorldKey {
    /// Key for `namespace/name`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a HelloWorld delivered by the watcher
    pub fn from_resource(hello_world: &HelloWorld) -> Result<Self, ControllerError> {
        match (&hello_world.metadata.namespace, &hello_world.metadata.name) {
            (Some(namespace), Some(name)) => Ok(Self::new(namespace, name)),
            _ => Err(ControllerError::InvalidResource(
                "HelloWorld without namespace or name".to_string(),
            )),
        }
    }
}

impl fmt::Display for HelloWorldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What the framework should do after a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Converged; wait for the next watch event
    Done,
    /// Check again after the delay
    RequeueAfter(Duration),
}

impl From<ReconcileAction> for Action {
    fn from(action: ReconcileAction) -> Self {
        match action {
            ReconcileAction::Done => Action::await_change(),
            ReconcileAction::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Reconciles HelloWorld resources into echo Pods.
pub struct Reconciler {
    pub(crate) client: Box<dyn ClusterClient>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) metrics: Metrics,
}

impl Reconciler {
    /// Creates a new reconciler.
    pub fn new(
        client: Box<dyn ClusterClient>,
        events: Arc<dyn EventPublisher>,
        metrics: Metrics,
    ) -> Self {
        Self {
            client,
            events,
            metrics,
        }
    }

    /// Metrics shared with the watcher and the metrics endpoint
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Publisher used for reconcile events
    pub fn events(&self) -> &Arc<dyn EventPublisher> {
        &self.events
    }

    /// Bring the Pod of the HelloWorld `key` in line with its spec.
    pub async fn reconcile_hello_world(
        &self,
        key: &HelloWorldKey,
    ) -> Result<ReconcileAction, ControllerError> {
        let Some(owner) = self.client.get_hello_world(&key.namespace, &key.name).await? else {
            // Owner is gone; garbage collection removes its Pod
            debug!("HelloWorld {} not found, nothing to do", key);
            return Ok(ReconcileAction::Done);
        };

        if owner.metadata.deletion_timestamp.is_some() {
            debug!("HelloWorld {} is being deleted, skipping", key);
            return Ok(ReconcileAction::Done);
        }

        let desired = pod_template::build_pod(&owner)?;
        let pod_name = pod_template::pod_name(&key.name);
        let observed = self.client.get_pod(&key.namespace, &pod_name).await?;

        if observed
            .as_ref()
            .is_some_and(|pod| pod.metadata.deletion_timestamp.is_some())
        {
            debug!("Pod {}/{} is terminating, checking again shortly", key.namespace, pod_name);
            return Ok(ReconcileAction::RequeueAfter(SHORT_REQUEUE));
        }

        match classify(observed.as_ref(), &desired) {
            PodState::Equivalent => {
                self.ensure_status(&owner, HelloWorldState::Provisioned).await?;
                Ok(ReconcileAction::Done)
            }
            PodState::Absent => self.create_pod(key, &owner, &desired).await,
            PodState::Drifted(reason) => {
                let Some(observed) = observed else {
                    return Ok(ReconcileAction::RequeueAfter(SHORT_REQUEUE));
                };
                info!("Pod {}/{} drifted ({}), replacing", key.namespace, pod_name, reason);
                self.delete_pod(key, &observed).await?;
                self.events
                    .publish(
                        &owner.object_ref(&()),
                        EventType::Normal,
                        reasons::REPLACING,
                        actions::DELETE_POD,
                        Some(format!("Deleted pod {pod_name}: {reason}")),
                    )
                    .await;
                self.ensure_status(&owner, HelloWorldState::Replacing).await?;
                Ok(ReconcileAction::RequeueAfter(SHORT_REQUEUE))
            }
        }
    }

    async fn create_pod(
        &self,
        key: &HelloWorldKey,
        owner: &HelloWorld,
        desired: &Pod,
    ) -> Result<ReconcileAction, ControllerError> {
        let pod_name = desired.metadata.name.clone().unwrap_or_default();
        match self.client.create_pod(&key.namespace, desired).await {
            Ok(_) => {
                info!("Created Pod {}/{} for HelloWorld {}", key.namespace, pod_name, key);
                self.metrics.record_pod_operation(ops::CREATE);
                self.events
                    .publish(
                        &owner.object_ref(&()),
                        EventType::Normal,
                        reasons::CREATED,
                        actions::CREATE_POD,
                        Some(format!("Created pod {pod_name}")),
                    )
                    .await;
                self.ensure_status(owner, HelloWorldState::Provisioned).await?;
                Ok(ReconcileAction::Done)
            }
            Err(ClusterError::AlreadyExists(_)) => {
                // Lost a race with another writer; classify again on the next pass
                debug!("Pod {}/{} already exists, re-checking", key.namespace, pod_name);
                Ok(ReconcileAction::RequeueAfter(SHORT_REQUEUE))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pod(&self, key: &HelloWorldKey, observed: &Pod) -> Result<(), ControllerError> {
        let pod_name = observed.metadata.name.as_deref().unwrap_or_default();
        let uid = observed.metadata.uid.as_deref().unwrap_or_default();
        match self.client.delete_pod(&key.namespace, pod_name, uid).await {
            Ok(()) => {
                self.metrics.record_pod_operation(ops::DELETE);
                Ok(())
            }
            // Already gone, or replaced by a Pod with a different uid
            Err(ClusterError::NotFound(_) | ClusterError::Conflict(_)) => {
                debug!("Pod {}/{} was already deleted or replaced", key.namespace, pod_name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_status(
        &self,
        owner: &HelloWorld,
        state: HelloWorldState,
    ) -> Result<(), ControllerError> {
        let desired = status::desired_status(owner, state);
        if !status::status_needs_update(owner.status.as_ref(), &desired) {
            return Ok(());
        }

        let namespace = owner.metadata.namespace.as_deref().unwrap_or_default();
        let name = owner.metadata.name.as_deref().unwrap_or_default();
        match self.client.patch_hello_world_status(namespace, name, &desired).await {
            Ok(()) => Ok(()),
            Err(ClusterError::NotFound(_)) => {
                warn!("HelloWorld {}/{} disappeared before its status was updated", namespace, name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
