//! Kubernetes Event recording for HelloWorld resources.
//!
//! Events show up in `kubectl describe hw <name>`. Publishing is
//! fire-and-forget: a failed event is logged and never fails a reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Reporting component on every Event
pub const CONTROLLER_NAME: &str = "helloworld-controller";

/// Publishes Kubernetes Events about an object.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`. Never fails.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// [`EventPublisher`] backed by `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher; `instance` is usually the Pod name of this replica.
    pub fn new(client: Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`.
pub mod reasons {
    /// Managed Pod was created
    pub const CREATED: &str = "Created";
    /// Drifted Pod was deleted and will be recreated
    pub const REPLACING: &str = "Replacing";
    /// Reconciliation returned an error
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

/// Event actions, shown in the ACTION column.
pub mod actions {
    /// Pod creation
    pub const CREATE_POD: &str = "CreatePod";
    /// Pod deletion
    pub const DELETE_POD: &str = "DeletePod";
    /// Reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
}
