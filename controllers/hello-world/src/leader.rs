//! Leader election using Kubernetes Leases
//!
//! Only the replica holding the `coordination.k8s.io/v1` Lease runs the
//! controller. Writes carry the `resourceVersion` that was read, so two
//! replicas racing for an expired lease cannot both win: the loser gets a
//! 409 Conflict and keeps waiting.

use crate::error::ControllerError;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Identity of this replica: the Pod name when running in-cluster
pub fn default_identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("helloworld-controller-{}", uuid::Uuid::new_v4()))
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Whether a lease spec (as JSON) has run out at `now`.
///
/// A lease without a holder, renew time or duration counts as expired.
fn lease_expired(spec: &Value, now: DateTime<Utc>) -> bool {
    if spec["holderIdentity"].as_str().is_none_or(str::is_empty) {
        return true;
    }
    let renew_time = spec["renewTime"]
        .as_str()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok());
    let duration = spec["leaseDurationSeconds"].as_i64();
    match (renew_time, duration) {
        (Some(renewed), Some(seconds)) => now > renewed.with_timezone(&Utc) + chrono::Duration::seconds(seconds),
        _ => true,
    }
}

/// Whether a leader that last renewed at `renewed_at` has to step down at `now`.
///
/// Leaves one retry interval before the lease runs out, so a standby never
/// takes over while this replica still acts as leader.
fn renewal_deadline_passed(renewed_at: Instant, now: Instant) -> bool {
    now + RETRY_INTERVAL >= renewed_at + LEASE_DURATION
}

/// Leader elector backed by a Lease
pub struct LeaderElector {
    api: Api<Lease>,
    lease_name: String,
    identity: String,
}

impl LeaderElector {
    /// Elector for Lease `namespace/lease_name` competing as `identity`
    pub fn new(client: Client, namespace: &str, lease_name: &str, identity: String) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lease_name: lease_name.to_string(),
            identity,
        }
    }

    /// Block until the lease is ours, then keep renewing it in the background
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(identity = %self.identity, lease = %self.lease_name, "Waiting for leadership");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    return self.create_guard();
                }
                Ok(false) => debug!(identity = %self.identity, "Lease held by another replica"),
                Err(e) => warn!(identity = %self.identity, error = %e, "Failed to acquire lease, retrying"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move { elector.renewal_loop(lost_tx).await });
        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, ControllerError> {
        let now = Utc::now();
        let Some(lease) = self.api.get_opt(&self.lease_name).await? else {
            return self.create_lease(now).await;
        };

        let spec = serde_json::to_value(&lease.spec).unwrap_or(Value::Null);
        let held_by_us = spec["holderIdentity"].as_str() == Some(self.identity.as_str());
        if !held_by_us && !lease_expired(&spec, now) {
            return Ok(false);
        }

        let Some(resource_version) = lease.metadata.resource_version else {
            return Err(ControllerError::LeaderElection(format!(
                "Lease {} has no resourceVersion",
                self.lease_name
            )));
        };
        let mut patch_spec = json!({
            "holderIdentity": self.identity,
            "leaseDurationSeconds": LEASE_DURATION.as_secs(),
            "renewTime": timestamp(now),
        });
        if !held_by_us {
            let transitions = spec["leaseTransitions"].as_i64().unwrap_or(0);
            patch_spec["acquireTime"] = json!(timestamp(now));
            patch_spec["leaseTransitions"] = json!(transitions + 1);
        }
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "spec": patch_spec,
        });

        match self
            .api
            .patch(&self.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                if !held_by_us {
                    info!(identity = %self.identity, "Took over expired lease");
                }
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease changed concurrently");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_lease(&self, now: DateTime<Utc>) -> Result<bool, ControllerError> {
        let lease: Lease = serde_json::from_value(json!({
            "metadata": { "name": self.lease_name },
            "spec": {
                "holderIdentity": self.identity,
                "leaseDurationSeconds": LEASE_DURATION.as_secs(),
                "acquireTime": timestamp(now),
                "renewTime": timestamp(now),
                "leaseTransitions": 0,
            },
        }))
        .map_err(|e| ControllerError::LeaderElection(format!("invalid Lease: {e}")))?;

        match self.api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %self.identity, "Created lease");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        let mut renewed_at = Instant::now();
        let mut wait = RENEW_INTERVAL;
        loop {
            tokio::time::sleep(wait).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    debug!(identity = %self.identity, "Lease renewed");
                    renewed_at = Instant::now();
                    wait = RENEW_INTERVAL;
                }
                Ok(false) => {
                    warn!(identity = %self.identity, "Lease taken by another replica");
                    break;
                }
                Err(e) if !renewal_deadline_passed(renewed_at, Instant::now()) => {
                    warn!(identity = %self.identity, error = %e, "Failed to renew lease, retrying");
                    wait = RETRY_INTERVAL;
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Lease not renewed before its deadline");
                    break;
                }
            }
        }
        warn!(identity = %self.identity, "Leadership lost");
        let _ = lost_tx.send(());
    }

    /// Give the lease up so a standby can take over without waiting for expiry
    async fn release_lease(&self) -> Result<(), ControllerError> {
        let Some(lease) = self.api.get_opt(&self.lease_name).await? else {
            return Ok(());
        };
        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            return Ok(());
        }
        let patch = json!({
            "metadata": { "resourceVersion": lease.metadata.resource_version },
            "spec": { "holderIdentity": null },
        });
        self.api
            .patch(&self.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(identity = %self.identity, "Lease released");
        Ok(())
    }
}

/// Held while this replica is the leader.
///
/// The renewal task stops when the guard is dropped.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Resolve once leadership has been lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Stop renewing and clear the lease holder
    pub async fn release(self) {
        self.renewal_task.abort();
        if let Err(e) = self.elector.release_lease().await {
            warn!(error = %e, "Failed to release lease");
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
    }
}
