//! Observed vs desired Pod comparison
//!
//! Only the fields the controller sets are compared. Anything the API
//! server, admission webhooks or the kubelet add is ignored.

use super::pod_template::CONTAINER_NAME;
use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::fmt;

/// Why an observed Pod does not match the desired one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftReason {
    /// Pod has no controller reference (made by hand)
    MissingControllerRef,
    /// Pod is controlled by some other object, or an earlier owner with the same name
    ForeignController,
    /// Pod has no `echo-container`
    MissingContainer,
    /// Container image differs
    ImageChanged,
    /// Container command differs, i.e. the message changed
    CommandChanged,
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::MissingControllerRef => "pod has no controller reference",
            Self::ForeignController => "pod is controlled by another object",
            Self::MissingContainer => "pod has no echo container",
            Self::ImageChanged => "container image changed",
            Self::CommandChanged => "message changed",
        };
        f.write_str(reason)
    }
}

/// Classification of the observed Pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodState {
    /// No Pod with the managed name exists
    Absent,
    /// Pod exists and matches the desired Pod
    Equivalent,
    /// Pod exists but must be replaced
    Drifted(DriftReason),
}

/// The controller reference of `pod`, if any
pub fn controller_ref(pod: &Pod) -> Option<&OwnerReference> {
    pod.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

/// The echo container of `pod`, ignoring injected sidecars
pub fn echo_container(pod: &Pod) -> Option<&Container> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == CONTAINER_NAME)
}

/// Classify `observed` against `desired`.
pub fn classify(observed: Option<&Pod>, desired: &Pod) -> PodState {
    let Some(observed) = observed else {
        return PodState::Absent;
    };

    let Some(observed_ref) = controller_ref(observed) else {
        return PodState::Drifted(DriftReason::MissingControllerRef);
    };
    let desired_uid = controller_ref(desired).map(|r| r.uid.as_str());
    if desired_uid != Some(observed_ref.uid.as_str()) {
        return PodState::Drifted(DriftReason::ForeignController);
    }

    let (Some(observed_container), Some(desired_container)) =
        (echo_container(observed), echo_container(desired))
    else {
        return PodState::Drifted(DriftReason::MissingContainer);
    };
    if observed_container.image != desired_container.image {
        return PodState::Drifted(DriftReason::ImageChanged);
    }
    if observed_container.command != desired_container.command {
        return PodState::Drifted(DriftReason::CommandChanged);
    }

    PodState::Equivalent
}
