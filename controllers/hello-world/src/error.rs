//! Controller-specific error types.
//!
//! This module defines error types specific to the HelloWorld Controller
//! that are not covered by upstream library errors.

use std::time::Duration;
use thiserror::Error;
use kube::Error as KubeError;

/// Delay before retrying errors an operator has to fix (RBAC, validation)
pub const PERMANENT_ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Delay before retrying errors expected to clear on their own
pub const TRANSIENT_ERROR_REQUEUE: Duration = Duration::from_secs(10);

/// Errors returned by [`crate::cluster::ClusterClient`] operations.
///
/// API status codes are folded into the classes the reconciler acts on.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create collided with an existing object of the same name (409 on create)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency or delete precondition failure (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// RBAC denied the request (401/403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Server-side validation rejected the object (400/422)
    #[error("Invalid: {0}")]
    Invalid(String),

    /// Any other API status
    #[error("API error ({code}): {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message returned by the API server
        message: String,
    },

    /// Network, TLS, timeout or decoding failure
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ClusterError {
    /// Classifies a kube error. `on_create` turns 409 into `AlreadyExists`.
    pub fn from_kube(err: KubeError, on_create: bool) -> Self {
        let message = err.to_string();
        match err {
            KubeError::Api(ae) => match ae.code {
                404 => Self::NotFound(message),
                409 if on_create => Self::AlreadyExists(message),
                409 => Self::Conflict(message),
                401 | 403 => Self::Forbidden(message),
                400 | 422 => Self::Invalid(message),
                code => Self::Api { code, message },
            },
            _ => Self::Transport(message),
        }
    }
}

/// Errors that can occur in the HelloWorld Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error outside the reconcile path
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster API error during reconciliation
    #[error("Cluster API error: {0}")]
    Cluster(#[from] ClusterError),

    /// Object is missing metadata the controller relies on
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Leader election failed or leadership was lost
    #[error("Leader election failed: {0}")]
    LeaderElection(String),

    /// Probe or metrics server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Short, stable label for metrics and events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cluster(ClusterError::NotFound(_)) => "not_found",
            Self::Cluster(ClusterError::AlreadyExists(_)) => "already_exists",
            Self::Cluster(ClusterError::Conflict(_)) => "conflict",
            Self::Cluster(ClusterError::Forbidden(_)) => "forbidden",
            Self::Cluster(ClusterError::Invalid(_)) => "invalid",
            Self::Cluster(ClusterError::Api { .. }) => "api",
            Self::Cluster(ClusterError::Transport(_)) => "transport",
            Self::Kube(_) => "kube",
            Self::InvalidResource(_) => "invalid_resource",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Metrics(_) => "metrics",
            Self::Watch(_) => "watch",
            Self::LeaderElection(_) => "leader_election",
            Self::Io(_) => "io",
        }
    }

    /// Requeue delay used by the controller error policy
    pub fn requeue_after(&self) -> Duration {
        match self {
            Self::Cluster(ClusterError::Forbidden(_) | ClusterError::Invalid(_))
            | Self::InvalidResource(_) => PERMANENT_ERROR_REQUEUE,
            _ => TRANSIENT_ERROR_REQUEUE,
        }
    }
}
