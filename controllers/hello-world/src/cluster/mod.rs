//! Cluster API seam for the reconciler
//!
//! The reconciler talks to the API server only through [`ClusterClient`].
//! [`KubeClusterClient`] is the production implementation on top of
//! `kube::Api`; tests use the in-memory mock in [`mock`].

#[cfg(test)]
pub mod mock;

use crate::error::ClusterError;
use crds::{HelloWorld, HelloWorldStatus};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams, Preconditions};
use kube::{Api, Client};
use tracing::debug;

/// Cluster operations needed to reconcile a HelloWorld.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a HelloWorld; `Ok(None)` when it does not exist
    async fn get_hello_world(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HelloWorld>, ClusterError>;

    /// Fetch a Pod; `Ok(None)` when it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError>;

    /// Create a Pod, returning the object as stored by the server
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError>;

    /// Delete a Pod only if its uid still matches
    async fn delete_pod(&self, namespace: &str, name: &str, uid: &str) -> Result<(), ClusterError>;

    /// Merge-patch the HelloWorld status subresource
    async fn patch_hello_world_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HelloWorldStatus,
    ) -> Result<(), ClusterError>;
}

/// [`ClusterClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Creates a client that issues requests with the given kube client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn hello_world_api(&self, namespace: &str) -> Api<HelloWorld> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pod_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_hello_world(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HelloWorld>, ClusterError> {
        self.hello_world_api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, false))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError> {
        self.pod_api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, false))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        self.pod_api(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| ClusterError::from_kube(e, true))
    }

    async fn delete_pod(&self, namespace: &str, name: &str, uid: &str) -> Result<(), ClusterError> {
        let dp = DeleteParams {
            preconditions: Some(Preconditions {
                uid: Some(uid.to_string()),
                resource_version: None,
            }),
            ..DeleteParams::default()
        };
        // Either branch means the server accepted the delete; a Left pod is still terminating
        let response = self
            .pod_api(namespace)
            .delete(name, &dp)
            .await
            .map_err(|e| ClusterError::from_kube(e, false))?;
        if response.is_left() {
            debug!("Pod {}/{} is terminating", namespace, name);
        }
        Ok(())
    }

    async fn patch_hello_world_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HelloWorldStatus,
    ) -> Result<(), ClusterError> {
        let status_patch = serde_json::json!({ "status": status });
        self.hello_world_api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await
            .map(|_| ())
            .map_err(|e| ClusterError::from_kube(e, false))
    }
}
