//! Desired Pod for a HelloWorld
//!
//! Builds the single echo Pod a HelloWorld owns. The result depends only on
//! the owner's name, namespace, uid and message.

use crate::error::ControllerError;
use crds::HelloWorld;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use std::collections::BTreeMap;

/// Name of the container that echoes the message
pub const CONTAINER_NAME: &str = "echo-container";

/// Image of the echo container
pub const CONTAINER_IMAGE: &str = "ubuntu";

/// Appended to the owner's name to form the Pod name
pub const POD_NAME_SUFFIX: &str = "-pod";

/// Label marking Pods managed by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "helloworld-controller";

/// Name of the Pod managed for the HelloWorld `owner_name`
pub fn pod_name(owner_name: &str) -> String {
    format!("{owner_name}{POD_NAME_SUFFIX}")
}

/// Quote `message` as one single-quoted shell word.
///
/// Inside single quotes nothing is special except `'` itself, which is
/// closed, escaped and reopened as `'\''`.
pub fn shell_quote(message: &str) -> String {
    format!("'{}'", message.replace('\'', r"'\''"))
}

/// Command of the echo container: print the message, then idle forever
pub fn echo_command(message: &str) -> Vec<String> {
    vec![
        "/bin/bash".to_string(),
        "-c".to_string(),
        format!("printf '%s\\n' {}; exec tail -f /dev/null", shell_quote(message)),
    ]
}

/// Build the desired Pod for `owner`.
///
/// Fails with [`ControllerError::InvalidResource`] when the owner lacks a
/// name, namespace or uid, since no controller reference can be formed.
pub fn build_pod(owner: &HelloWorld) -> Result<Pod, ControllerError> {
    let name = owner
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidResource("HelloWorld has no name".to_string()))?;
    let namespace = owner.metadata.namespace.as_deref().ok_or_else(|| {
        ControllerError::InvalidResource(format!("HelloWorld {name} has no namespace"))
    })?;
    // Foreground deletion of the owner waits for the Pod to go first
    let owner_ref = OwnerReference {
        block_owner_deletion: Some(true),
        ..owner.controller_owner_ref(&()).ok_or_else(|| {
            ControllerError::InvalidResource(format!("HelloWorld {namespace}/{name} has no uid"))
        })?
    };

    let labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]);

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(pod_name(name)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner_ref]),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: CONTAINER_NAME.to_string(),
                image: Some(CONTAINER_IMAGE.to_string()),
                command: Some(echo_command(&owner.spec.message)),
                ..Container::default()
            }],
            ..PodSpec::default()
        }),
        status: None,
    })
}
