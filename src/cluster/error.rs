//! # Cluster Errors
//!
//! Typed errors returned by [`ClusterClient`](super::ClusterClient) implementations.

use super::resource::{ObjectKey, ResourceKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    /// The cluster does not serve the kind, i.e. its CRD is not installed
    #[error("no matches for kind {0}: the custom resource definition is not installed")]
    NoMatch(ResourceKind),

    #[error("conflict on {kind} {key}: {message}")]
    Conflict {
        kind: ResourceKind,
        key: ObjectKey,
        message: String,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("expected {expected} but got {actual}")]
    UnexpectedKind {
        expected: ResourceKind,
        actual: ResourceKind,
    },
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, ClusterError::NoMatch(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClusterError::Unauthorized(_))
    }

    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Conflict { .. } | ClusterError::Transport(_) | ClusterError::NoMatch(_) => {
                true
            }
            ClusterError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// Classify a `kube` client error for the given object
    pub(crate) fn from_kube(err: kube::Error, kind: ResourceKind, key: &ObjectKey) -> Self {
        match err {
            kube::Error::Api(response) => match response.code {
                // An unknown resource type yields a bare 404 without an object name
                404 if response
                    .message
                    .contains("could not find the requested resource") =>
                {
                    ClusterError::NoMatch(kind)
                }
                404 => ClusterError::NotFound {
                    kind,
                    key: key.clone(),
                },
                409 => ClusterError::Conflict {
                    kind,
                    key: key.clone(),
                    message: response.message.clone(),
                },
                401 | 403 => ClusterError::Unauthorized(response.message.clone()),
                code => ClusterError::Api {
                    code,
                    message: response.message.clone(),
                },
            },
            kube::Error::SerdeError(e) => ClusterError::Serialization(e),
            other => ClusterError::Transport(other.to_string()),
        }
    }
}
