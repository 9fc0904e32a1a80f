//! HelloWorld status helpers

use super::pod_template::pod_name;
use crds::{HelloWorld, HelloWorldState, HelloWorldStatus};

/// Status the owner should carry once it reaches `state`
pub fn desired_status(owner: &HelloWorld, state: HelloWorldState) -> HelloWorldStatus {
    HelloWorldStatus {
        observed_generation: owner.metadata.generation,
        pod_name: owner.metadata.name.as_deref().map(pod_name),
        state,
    }
}

/// Whether the owner's current status differs from `desired`.
///
/// Skipping equal patches keeps a steady-state reconcile free of writes.
pub fn status_needs_update(current: Option<&HelloWorldStatus>, desired: &HelloWorldStatus) -> bool {
    current != Some(desired)
}
