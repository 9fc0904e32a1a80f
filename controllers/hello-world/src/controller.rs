//! Main controller implementation.
//!
//! This module contains the `Controller` struct that starts the probe and
//! metrics servers, optionally waits for leadership, and then runs the
//! HelloWorld watcher until shutdown or a fatal error.

use crate::cluster::KubeClusterClient;
use crate::config::Config;
use crate::error::ControllerError;
use crate::events::KubeEventPublisher;
use crate::leader::{LeaderElector, LeaderGuard, default_identity};
use crate::metrics::Metrics;
use crate::probes;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::HelloWorld;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{error, info};

type Task = JoinHandle<Result<(), ControllerError>>;

/// Await an optional task; a missing task never completes
async fn join_task(task: Option<Task>, name: &str) -> Result<(), ControllerError> {
    match task {
        Some(task) => task
            .await
            .map_err(|e| ControllerError::Watch(format!("{name} task failed: {e}")))?,
        None => pending().await,
    }
}

/// Main controller for HelloWorld resources.
pub struct Controller {
    hello_world_watcher: Task,
    probe_server: Option<Task>,
    metrics_server: Option<Task>,
    leader: Option<LeaderGuard>,
}

impl Controller {
    /// Creates a new controller instance.
    ///
    /// Listeners are bound before leader election so probes answer while
    /// this replica is a standby.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing HelloWorld Controller");

        let client = Client::try_default().await?;
        let metrics = Metrics::new()?;
        let ready = Arc::new(AtomicBool::new(false));

        let probe_server = match config.probe_addr()? {
            Some(addr) => {
                let listener = probes::bind(addr, "health probe").await?;
                let router = probes::probe_routes(Arc::clone(&ready));
                Some(tokio::spawn(probes::serve(listener, router)))
            }
            None => None,
        };
        let metrics_server = match config.metrics_addr()? {
            Some(addr) => {
                let listener = probes::bind(addr, "metrics").await?;
                let router = probes::metrics_routes(metrics.clone());
                Some(tokio::spawn(probes::serve(listener, router)))
            }
            None => None,
        };

        let leader = if config.leader_elect {
            let elector = Arc::new(LeaderElector::new(
                client.clone(),
                &config.leader_election_namespace,
                &config.leader_election_id,
                default_identity(),
            ));
            Some(elector.acquire().await)
        } else {
            None
        };

        let (hello_world_api, pod_api): (Api<HelloWorld>, Api<Pod>) = match &config.watch_namespace {
            Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns)),
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };
        info!(
            "Watching {}",
            config.watch_namespace.as_deref().unwrap_or("all namespaces")
        );

        let events = KubeEventPublisher::new(client.clone(), std::env::var("POD_NAME").ok());
        let reconciler = Arc::new(Reconciler::new(
            Box::new(KubeClusterClient::new(client)),
            Arc::new(events),
            metrics,
        ));

        let watcher = Watcher::new(
            reconciler,
            hello_world_api,
            pod_api,
            config.max_concurrent_reconciles,
        );
        let hello_world_watcher = tokio::spawn(async move { watcher.watch_hello_worlds().await });

        ready.store(true, Ordering::SeqCst);
        info!("HelloWorld Controller started");

        Ok(Self {
            hello_world_watcher,
            probe_server,
            metrics_server,
            leader,
        })
    }

    /// Runs until the watcher stops on a shutdown signal.
    ///
    /// Losing leadership or a server failure is returned as an error so the
    /// process exits non-zero and restarts as a follower.
    pub async fn run(self) -> Result<(), ControllerError> {
        let Self {
            hello_world_watcher,
            probe_server,
            metrics_server,
            mut leader,
        } = self;

        let leadership_lost = async {
            match leader.as_mut() {
                Some(guard) => guard.lost().await,
                None => pending().await,
            }
        };

        let result = tokio::select! {
            result = join_task(Some(hello_world_watcher), "watcher") => result,
            result = join_task(probe_server, "health probe server") => {
                error!("Health probe server stopped");
                result.and(Err(ControllerError::Watch("health probe server stopped".to_string())))
            }
            result = join_task(metrics_server, "metrics server") => {
                error!("Metrics server stopped");
                result.and(Err(ControllerError::Watch("metrics server stopped".to_string())))
            }
            () = leadership_lost => {
                Err(ControllerError::LeaderElection("leader lease lost".to_string()))
            }
        };

        if result.is_ok() {
            if let Some(guard) = leader {
                guard.release().await;
            }
            info!("HelloWorld Controller shut down");
        }
        result
    }
}
