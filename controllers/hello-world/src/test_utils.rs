//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and driving the
//! reconciler against the in-memory cluster.

use crate::cluster::mock::MockClusterClient;
use crate::events::EventPublisher;
use crate::metrics::Metrics;
use crate::reconciler::{HelloWorldKey, ReconcileAction, Reconciler};
use async_trait::async_trait;
use crds::{HelloWorld, HelloWorldSpec};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use std::sync::{Arc, Mutex};

/// Upper bound on passes before a test declares a livelock
const MAX_PASSES: usize = 10;

/// Helper to create a test HelloWorld CRD
pub fn create_test_hello_world(name: &str, namespace: &str, uid: &str, message: &str) -> HelloWorld {
    HelloWorld {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: HelloWorldSpec {
            message: message.to_string(),
        },
        status: None,
    }
}

/// Event captured by [`RecordingEventPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub warning: bool,
    pub reason: String,
}

/// Event publisher that keeps every event in memory
#[derive(Clone, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            object: format!(
                "{}/{}",
                resource_ref.namespace.as_deref().unwrap_or_default(),
                resource_ref.name.as_deref().unwrap_or_default()
            ),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
        });
    }
}

/// Helper to create a reconciler wired to the mock cluster
pub fn create_test_reconciler(
    cluster: &MockClusterClient,
) -> (Reconciler, RecordingEventPublisher) {
    let events = RecordingEventPublisher::default();
    let reconciler = Reconciler::new(
        Box::new(cluster.clone()),
        Arc::new(events.clone()),
        Metrics::new().unwrap(),
    );
    (reconciler, events)
}

/// Reconcile `key` until it reports `Done`, letting terminating Pods finish
/// between requeues the way the kubelet would.
///
/// Returns the number of passes taken.
pub async fn run_to_steady_state(
    reconciler: &Reconciler,
    cluster: &MockClusterClient,
    key: &HelloWorldKey,
) -> usize {
    for pass in 1..=MAX_PASSES {
        match reconciler.reconcile_hello_world(key).await.unwrap() {
            ReconcileAction::Done => return pass,
            ReconcileAction::RequeueAfter(_) => cluster.reap_terminating(),
        }
    }
    panic!("{key} did not converge within {MAX_PASSES} passes");
}
