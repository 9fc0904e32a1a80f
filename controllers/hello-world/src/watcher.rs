//! Kubernetes resource watchers.
//!
//! Registers the HelloWorld controller with `kube_runtime::Controller`:
//! HelloWorlds are the primary resource. Every Pod whose controller
//! reference names a HelloWorld routes its changes back to that owner,
//! whether or not it still carries the managed-by label. Status-only
//! HelloWorld updates are filtered out by generation.

use crate::error::ControllerError;
use crate::events::{actions, reasons};
use crate::metrics::results;
use crate::reconciler::differ::controller_ref;
use crate::reconciler::{HelloWorldKey, ReconcileAction, Reconciler};
use crds::HelloWorld;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use kube::api::Api;
use kube::runtime::events::EventType;
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, WatchStreamExt, reflector, watcher};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Reconcile entry point handed to the framework
async fn reconcile(
    hello_world: Arc<HelloWorld>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ControllerError> {
    let key = HelloWorldKey::from_resource(&hello_world)?;
    let span = info_span!("reconcile", namespace = %key.namespace, name = %key.name);

    async move {
        let started = Instant::now();
        let metrics = reconciler.metrics();
        match reconciler.reconcile_hello_world(&key).await {
            Ok(action) => {
                let result = match action {
                    ReconcileAction::Done => results::DONE,
                    ReconcileAction::RequeueAfter(_) => results::REQUEUE,
                };
                metrics.record_reconcile(result, started.elapsed());
                debug!(?action, "Reconcile finished");
                Ok(action.into())
            }
            Err(e) => {
                metrics.record_reconcile(results::ERROR, started.elapsed());
                metrics.record_error(e.kind());
                reconciler
                    .events()
                    .publish(
                        &hello_world.object_ref(&()),
                        EventType::Warning,
                        reasons::RECONCILE_FAILED,
                        actions::RECONCILE,
                        Some(e.to_string()),
                    )
                    .await;
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

/// Hash of `(uid, generation)`.
///
/// The uid is part of the key because a HelloWorld recreated under the same
/// name starts again at generation 1.
fn uid_and_generation(hello_world: &HelloWorld) -> Option<u64> {
    let meta = hello_world.meta();
    let generation = meta.generation?;
    let mut hasher = DefaultHasher::new();
    (meta.uid.as_deref(), generation).hash(&mut hasher);
    Some(hasher.finish())
}

/// Drop HelloWorld events that carry no spec change, such as our own status patches
pub(crate) fn spec_changes<S>(
    hello_worlds: S,
) -> impl Stream<Item = Result<HelloWorld, watcher::Error>> + Send + 'static
where
    S: Stream<Item = Result<HelloWorld, watcher::Error>> + Send + 'static,
{
    hello_worlds.predicate_filter(uid_and_generation)
}

/// HelloWorld holding the controller reference of `pod`, if any
pub(crate) fn owning_hello_world(pod: Pod) -> Option<ObjectRef<HelloWorld>> {
    let namespace = pod.metadata.namespace.as_deref()?;
    let owner = controller_ref(&pod)?;
    let is_hello_world =
        owner.kind == HelloWorld::kind(&()) && owner.api_version == HelloWorld::api_version(&());
    is_hello_world.then(|| ObjectRef::new(&owner.name).within(namespace))
}

/// Requeue failed reconciles with a delay chosen by error class
fn error_policy(
    hello_world: Arc<HelloWorld>,
    err: &ControllerError,
    _reconciler: Arc<Reconciler>,
) -> Action {
    let delay = err.requeue_after();
    error!(
        namespace = hello_world.metadata.namespace.as_deref().unwrap_or_default(),
        name = hello_world.metadata.name.as_deref().unwrap_or_default(),
        kind = err.kind(),
        retry_secs = delay.as_secs(),
        "Reconciliation failed: {}",
        err
    );
    Action::requeue(delay)
}

/// Watches HelloWorlds and their Pods.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    hello_world_api: Api<HelloWorld>,
    pod_api: Api<Pod>,
    concurrency: u16,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        hello_world_api: Api<HelloWorld>,
        pod_api: Api<Pod>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            hello_world_api,
            pod_api,
            concurrency,
        }
    }

    /// Run the controller until SIGINT/SIGTERM.
    ///
    /// In-flight reconciles finish before this returns.
    pub async fn watch_hello_worlds(&self) -> Result<(), ControllerError> {
        info!("Starting HelloWorld watcher");

        let (reader, writer) = reflector::store();
        let hello_worlds = spec_changes(
            watcher(self.hello_world_api.clone(), watcher::Config::default())
                .default_backoff()
                .reflect(writer)
                .applied_objects(),
        );

        let controller_config = ControllerConfig::default().concurrency(self.concurrency);

        Controller::for_stream(hello_worlds, reader)
            .watches(self.pod_api.clone(), watcher::Config::default(), owning_hello_world)
            .with_config(controller_config)
            .shutdown_on_signal()
            .run(reconcile, error_policy, Arc::clone(&self.reconciler))
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled HelloWorld {}", obj),
                    Err(e) => warn!("Controller error: {}", e),
                }
            })
            .await;

        info!("HelloWorld watcher stopped");
        Ok(())
    }
}
