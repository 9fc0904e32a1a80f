//! Mock ClusterClient for unit testing
//!
//! Stores HelloWorlds and Pods in memory and imitates the API server
//! behaviour the reconciler depends on: uid assignment, AlreadyExists on
//! name collisions, uid delete preconditions, graceful termination, and
//! owner-reference garbage collection.

use super::ClusterClient;
use crate::error::ClusterError;
use crds::{HelloWorld, HelloWorldStatus};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type ObjectKey = (String, String);

/// Write issued against the mock, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    CreatePod(String),
    DeletePod(String),
    PatchStatus(String),
}

/// Operation that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetHelloWorld,
    GetPod,
    CreatePod,
    DeletePod,
    PatchStatus,
}

/// Fixed timestamp used for deletion markers
pub fn test_timestamp() -> Time {
    serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap()
}

/// Mock ClusterClient for testing
#[derive(Clone, Default)]
pub struct MockClusterClient {
    hello_worlds: Arc<Mutex<BTreeMap<ObjectKey, HelloWorld>>>,
    pods: Arc<Mutex<BTreeMap<ObjectKey, Pod>>>,
    writes: Arc<Mutex<Vec<Write>>>,
    failures: Arc<Mutex<HashMap<Op, ClusterError>>>,
    graceful_deletion: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl MockClusterClient {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn next_uid(&self, prefix: &str) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-uid-{id}")
    }

    /// Store a HelloWorld as the API server would, assigning a uid and generation
    pub fn apply_hello_world(&self, mut hello_world: HelloWorld) -> HelloWorld {
        let key = (
            hello_world.metadata.namespace.clone().unwrap(),
            hello_world.metadata.name.clone().unwrap(),
        );
        let mut hello_worlds = self.hello_worlds.lock().unwrap();
        match hello_worlds.get(&key) {
            Some(existing) => {
                hello_world.metadata.uid = existing.metadata.uid.clone();
                hello_world.status = existing.status.clone();
                let generation = existing.metadata.generation.unwrap_or(1);
                hello_world.metadata.generation = if existing.spec == hello_world.spec {
                    Some(generation)
                } else {
                    Some(generation + 1)
                };
            }
            None => {
                if hello_world.metadata.uid.is_none() {
                    hello_world.metadata.uid = Some(self.next_uid("hw"));
                }
                hello_world.metadata.generation = Some(1);
            }
        }
        hello_worlds.insert(key, hello_world.clone());
        hello_world
    }

    /// Change the message of a stored HelloWorld
    pub fn set_message(&self, namespace: &str, name: &str, message: &str) {
        let mut hello_world = self.hello_world(namespace, name).unwrap();
        hello_world.spec.message = message.to_string();
        self.apply_hello_world(hello_world);
    }

    /// Mark a stored HelloWorld as being deleted
    pub fn mark_hello_world_deleting(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        if let Some(hello_world) = self.hello_worlds.lock().unwrap().get_mut(&key) {
            hello_world.metadata.deletion_timestamp = Some(test_timestamp());
        }
    }

    /// Remove a HelloWorld and garbage-collect the Pods it controls
    pub fn delete_hello_world(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        let Some(removed) = self.hello_worlds.lock().unwrap().remove(&key) else {
            return;
        };
        let uid = removed.metadata.uid.unwrap_or_default();
        self.pods.lock().unwrap().retain(|_, pod| {
            !pod.metadata
                .owner_references
                .iter()
                .flatten()
                .any(|r| r.controller == Some(true) && r.uid == uid)
        });
    }

    /// Current copy of a stored HelloWorld
    pub fn hello_world(&self, namespace: &str, name: &str) -> Option<HelloWorld> {
        let key = (namespace.to_string(), name.to_string());
        self.hello_worlds.lock().unwrap().get(&key).cloned()
    }

    /// Store a Pod directly, bypassing the reconciler (user-made or stale pods)
    pub fn insert_pod(&self, mut pod: Pod) {
        let key = (
            pod.metadata.namespace.clone().unwrap(),
            pod.metadata.name.clone().unwrap(),
        );
        if pod.metadata.uid.is_none() {
            pod.metadata.uid = Some(self.next_uid("pod"));
        }
        self.pods.lock().unwrap().insert(key, pod);
    }

    /// Remove a Pod directly, as a user with kubectl would
    pub fn remove_pod(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        self.pods.lock().unwrap().remove(&key);
    }

    /// Current copy of a stored Pod
    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        let key = (namespace.to_string(), name.to_string());
        self.pods.lock().unwrap().get(&key).cloned()
    }

    /// All stored Pods in a namespace
    pub fn pods_in(&self, namespace: &str) -> Vec<Pod> {
        self.pods
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod.clone())
            .collect()
    }

    /// Keep deleted Pods around with a deletion timestamp until [`Self::reap_terminating`]
    pub fn set_graceful_deletion(&self, enabled: bool) {
        self.graceful_deletion.store(enabled, Ordering::SeqCst);
    }

    /// Finish termination of every Pod that has a deletion timestamp
    pub fn reap_terminating(&self) {
        self.pods
            .lock()
            .unwrap()
            .retain(|_, pod| pod.metadata.deletion_timestamp.is_none());
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: Op, error: ClusterError) {
        self.failures.lock().unwrap().insert(op, error);
    }

    /// Writes issued so far
    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn take_failure(&self, op: Op) -> Result<(), ClusterError> {
        match self.failures.lock().unwrap().remove(&op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn record(&self, write: Write) {
        self.writes.lock().unwrap().push(write);
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    async fn get_hello_world(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HelloWorld>, ClusterError> {
        self.take_failure(Op::GetHelloWorld)?;
        Ok(self.hello_world(namespace, name))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError> {
        self.take_failure(Op::GetPod)?;
        Ok(self.pod(namespace, name))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.record(Write::CreatePod(name.clone()));
        self.take_failure(Op::CreatePod)?;

        let key = (namespace.to_string(), name.clone());
        let mut pods = self.pods.lock().unwrap();
        if pods.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("pods \"{name}\" already exists")));
        }

        // Fields the API server and kubelet fill in
        let mut stored = pod.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.uid = Some(self.next_uid("pod"));
        stored.metadata.resource_version = Some("1".to_string());
        if let Some(spec) = stored.spec.as_mut() {
            spec.node_name = Some("node-1".to_string());
            spec.service_account_name = Some("default".to_string());
        }
        stored.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            ..PodStatus::default()
        });
        pods.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_pod(&self, namespace: &str, name: &str, uid: &str) -> Result<(), ClusterError> {
        self.record(Write::DeletePod(name.to_string()));
        self.take_failure(Op::DeletePod)?;

        let key = (namespace.to_string(), name.to_string());
        let mut pods = self.pods.lock().unwrap();
        let Some(pod) = pods.get_mut(&key) else {
            return Err(ClusterError::NotFound(format!("pods \"{name}\" not found")));
        };
        if pod.metadata.uid.as_deref() != Some(uid) {
            return Err(ClusterError::Conflict(format!(
                "Precondition failed: UID in precondition: {uid}"
            )));
        }
        if self.graceful_deletion.load(Ordering::SeqCst) {
            pod.metadata.deletion_timestamp = Some(test_timestamp());
        } else {
            pods.remove(&key);
        }
        Ok(())
    }

    async fn patch_hello_world_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HelloWorldStatus,
    ) -> Result<(), ClusterError> {
        self.record(Write::PatchStatus(name.to_string()));
        self.take_failure(Op::PatchStatus)?;

        let key = (namespace.to_string(), name.to_string());
        match self.hello_worlds.lock().unwrap().get_mut(&key) {
            Some(hello_world) => {
                hello_world.status = Some(status.clone());
                Ok(())
            }
            None => Err(ClusterError::NotFound(format!("helloworlds \"{name}\" not found"))),
        }
    }
}
