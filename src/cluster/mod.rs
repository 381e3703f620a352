//! # Cluster Access
//!
//! A narrow, object-safe client interface shared by the control plane and the
//! runtime clusters.
//!
//! Everything the controller reads or writes is expressed as a [`Resource`], a
//! tagged union over the kinds the controller knows. Payloads the controller does
//! not interpret (descriptors, module default CRs) stay opaque JSON inside those
//! kinds and round-trip untouched.
//!
//! ## Implementations
//!
//! - [`KubeCluster`] talks to an API server through `kube::Client`
//! - `InMemoryCluster` keeps objects in process memory for tests (`test-util` feature)

mod error;
mod kube_cluster;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod resource;

pub use error::ClusterError;
pub use kube_cluster::{build_client, FlowControl, KubeCluster};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{InMemoryCluster, Verb};
pub use resource::{
    clear_server_fields, KnownResource, ObjectKey, Ownership, Resource, ResourceKind,
};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared handle to a cluster client
pub type SharedCluster = Arc<dyn ClusterClient>;

/// Filter for list calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Restrict to one namespace; `None` lists across all namespaces
    pub namespace: Option<String>,
    /// Equality-based label selector
    pub match_labels: BTreeMap<String, String>,
}

impl ListOptions {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Selector in API server syntax, e.g. `a=b,c=d`
    pub fn label_selector(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn matches(&self, resource: &Resource) -> bool {
        let meta = resource.metadata();
        if let Some(namespace) = &self.namespace {
            if meta.namespace.as_deref().unwrap_or_default() != namespace {
                return false;
            }
        }
        self.match_labels.iter().all(|(k, v)| {
            meta.labels
                .as_ref()
                .and_then(|labels| labels.get(k))
                .is_some_and(|value| value == v)
        })
    }
}

/// Client for one cluster
///
/// All calls may block on network I/O. Implementations must be usable from many
/// reconciles at once.
#[async_trait]
pub trait ClusterClient: Send + Sync + std::fmt::Debug {
    /// Human-readable identity of the cluster, used in logs
    fn identity(&self) -> &str;

    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Resource, ClusterError>;

    async fn list(
        &self,
        kind: ResourceKind,
        options: &ListOptions,
    ) -> Result<Vec<Resource>, ClusterError>;

    async fn create(&self, resource: &Resource) -> Result<Resource, ClusterError>;

    /// Replace the object, leaving its status untouched
    async fn update(&self, resource: &Resource) -> Result<Resource, ClusterError>;

    /// Replace only the status of the object
    async fn update_status(&self, resource: &Resource) -> Result<Resource, ClusterError>;

    /// Server-side apply with forced ownership under the given field manager
    async fn apply(
        &self,
        resource: &Resource,
        field_manager: &str,
    ) -> Result<Resource, ClusterError>;

    /// Delete the object. Objects with finalizers are only marked for deletion.
    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), ClusterError>;
}

/// Typed convenience layer over [`ClusterClient`]
#[async_trait]
pub trait ClusterClientExt: ClusterClient {
    async fn get_as<K: KnownResource>(&self, key: &ObjectKey) -> Result<K, ClusterError> {
        K::from_resource(self.get(K::KIND, key).await?)
    }

    async fn list_as<K: KnownResource>(&self, options: &ListOptions) -> Result<Vec<K>, ClusterError> {
        self.list(K::KIND, options)
            .await?
            .into_iter()
            .map(K::from_resource)
            .collect()
    }

    async fn create_as<K: KnownResource>(&self, object: &K) -> Result<K, ClusterError> {
        K::from_resource(self.create(&object.clone().into_resource()).await?)
    }

    async fn update_as<K: KnownResource>(&self, object: &K) -> Result<K, ClusterError> {
        K::from_resource(self.update(&object.clone().into_resource()).await?)
    }

    async fn update_status_as<K: KnownResource>(&self, object: &K) -> Result<K, ClusterError> {
        K::from_resource(self.update_status(&object.clone().into_resource()).await?)
    }

    async fn apply_as<K: KnownResource>(
        &self,
        object: &K,
        field_manager: &str,
    ) -> Result<K, ClusterError> {
        K::from_resource(
            self.apply(&object.clone().into_resource(), field_manager)
                .await?,
        )
    }

    async fn delete_as<K: KnownResource>(&self, key: &ObjectKey) -> Result<(), ClusterError> {
        self.delete(K::KIND, key).await
    }
}

impl<T: ClusterClient + ?Sized> ClusterClientExt for T {}

/// Map not-found to `Ok(None)`
pub fn ignore_not_found<T>(result: Result<T, ClusterError>) -> Result<Option<T>, ClusterError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector_is_sorted_and_joined() {
        let options = ListOptions::in_namespace("kcp-system")
            .with_label("b", "2")
            .with_label("a", "1");
        assert_eq!(options.label_selector(), "a=1,b=2");
    }
}
