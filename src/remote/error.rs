//! # Remote Errors
//!
//! Errors from resolving runtime-cluster clients and from sync-session operations.

use crate::cluster::{ClusterError, ObjectKey};
use thiserror::Error;

/// Failure to obtain a client for a tenant's runtime cluster
#[derive(Debug, Error)]
pub enum RemoteError {
    /// No access secret exists for the tenant; the runtime cluster is considered gone
    #[error("access secret for kyma {0} not found")]
    AccessSecretNotFound(ObjectKey),

    #[error("access secret {secret} does not contain a kubeconfig under key {key}")]
    InvalidAccessSecret { secret: String, key: String },

    #[error("invalid kubeconfig in access secret {secret}: {message}")]
    Kubeconfig { secret: String, message: String },

    #[error("no connector configured for sync strategy {0}")]
    UnsupportedStrategy(String),

    #[error("failed to build runtime cluster client: {0}")]
    ClientBuild(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl RemoteError {
    pub fn is_access_secret_not_found(&self) -> bool {
        matches!(self, RemoteError::AccessSecretNotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RemoteError::Cluster(e) if e.is_unauthorized())
    }
}

/// Failure of an operation that spans the control plane and the runtime cluster
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("remote kyma not found and control-plane kyma is under deletion")]
    NotFoundAndKcpKymaUnderDeleting,

    #[error("failed to install CRD {name} in runtime cluster: {source}")]
    CrdInstallation {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to ensure namespace {namespace} in runtime cluster: {source}")]
    Namespace {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl SessionError {
    pub fn is_access_secret_not_found(&self) -> bool {
        matches!(self, SessionError::Remote(e) if e.is_access_secret_not_found())
    }

    pub fn is_unauthorized(&self) -> bool {
        match self {
            SessionError::Remote(e) => e.is_unauthorized(),
            SessionError::Cluster(e) => e.is_unauthorized(),
            SessionError::CrdInstallation { source, .. } | SessionError::Namespace { source, .. } => {
                source.is_unauthorized()
            }
            SessionError::NotFoundAndKcpKymaUnderDeleting => false,
        }
    }
}
