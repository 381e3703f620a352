//! # Kubernetes Cluster Client
//!
//! [`ClusterClient`] backed by `kube::Client`.
//!
//! Clients built here share one flow-control policy: a token-bucket rate limit
//! (QPS) and a cap on in-flight requests (burst), layered onto the kube client
//! stack with `tower`.

use super::error::ClusterError;
use super::resource::{ObjectKey, Resource, ResourceKind};
use super::{ClusterClient, ListOptions};
use crate::crd::{Kyma, Manifest, ModuleTemplate};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::client::ClientBuilder;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tower::limit::{ConcurrencyLimitLayer, RateLimitLayer};

/// Client-side flow control applied to every cluster client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    /// Sustained requests per second
    pub qps: u64,
    /// Maximum requests in flight
    pub burst: usize,
}

/// Build a kube client that honours the given flow control
pub fn build_client(config: kube::Config, flow: FlowControl) -> Result<Client, kube::Error> {
    let client = ClientBuilder::try_from(config)?
        .with_layer(&RateLimitLayer::new(flow.qps.max(1), Duration::from_secs(1)))
        .with_layer(&ConcurrencyLimitLayer::new(flow.burst.max(1)))
        .build();
    Ok(client)
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    identity: String,
}

impl Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client, identity: impl Into<String>) -> Self {
        Self {
            client,
            identity: identity.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match namespace {
            Some(ns) if !ns.is_empty() => Api::namespaced(self.client.clone(), ns),
            _ => Api::all(self.client.clone()),
        }
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }
}

trait ApiObject: kube::Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync {}

impl<K> ApiObject for K where K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync {}

async fn get_with<K: ApiObject>(api: Api<K>, kind: ResourceKind, key: &ObjectKey) -> Result<K, ClusterError> {
    api.get(&key.name)
        .await
        .map_err(|e| ClusterError::from_kube(e, kind, key))
}

async fn list_with<K: ApiObject>(
    api: Api<K>,
    kind: ResourceKind,
    options: &ListOptions,
) -> Result<Vec<K>, ClusterError> {
    let params = ListParams::default().labels(&options.label_selector());
    let key = ObjectKey::new(options.namespace.clone().unwrap_or_default(), "");
    api.list(&params)
        .await
        .map(|list| list.items)
        .map_err(|e| ClusterError::from_kube(e, kind, &key))
}

async fn create_with<K: ApiObject>(api: Api<K>, kind: ResourceKind, object: &K) -> Result<K, ClusterError> {
    let key = ObjectKey::of(object.meta());
    api.create(&PostParams::default(), object)
        .await
        .map_err(|e| ClusterError::from_kube(e, kind, &key))
}

async fn update_with<K: ApiObject>(api: Api<K>, kind: ResourceKind, object: &K) -> Result<K, ClusterError> {
    let key = ObjectKey::of(object.meta());
    api.replace(&key.name, &PostParams::default(), object)
        .await
        .map_err(|e| ClusterError::from_kube(e, kind, &key))
}

async fn update_status_with<K: ApiObject>(
    api: Api<K>,
    kind: ResourceKind,
    object: &K,
) -> Result<K, ClusterError> {
    let key = ObjectKey::of(object.meta());
    let status = serde_json::to_value(object)?
        .get("status")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &key.name,
        &PatchParams::apply(crate::constants::STATUS_FIELD_MANAGER),
        &Patch::Merge(patch),
    )
    .await
    .map_err(|e| ClusterError::from_kube(e, kind, &key))
}

async fn apply_with<K: ApiObject>(
    api: Api<K>,
    kind: ResourceKind,
    object: &K,
    field_manager: &str,
) -> Result<K, ClusterError> {
    let key = ObjectKey::of(object.meta());
    api.patch(
        &key.name,
        &PatchParams::apply(field_manager).force(),
        &Patch::Apply(object),
    )
    .await
    .map_err(|e| ClusterError::from_kube(e, kind, &key))
}

async fn delete_with<K: ApiObject>(api: Api<K>, kind: ResourceKind, key: &ObjectKey) -> Result<(), ClusterError> {
    api.delete(&key.name, &DeleteParams::default())
        .await
        .map(|_| ())
        .map_err(|e| ClusterError::from_kube(e, kind, key))
}

/// Run `$body` with `$api` bound to the API of the object held by `$resource`,
/// wrapping the result back into a [`Resource`]
macro_rules! with_object_api {
    ($self:ident, $resource:expr, |$api:ident, $obj:ident| $body:expr) => {
        match $resource {
            Resource::Kyma($obj) => {
                let $api = $self.namespaced::<Kyma>($obj.metadata.namespace.as_deref());
                $body.await.map(Resource::Kyma)
            }
            Resource::ModuleTemplate($obj) => {
                let $api = $self.namespaced::<ModuleTemplate>($obj.metadata.namespace.as_deref());
                $body.await.map(Resource::ModuleTemplate)
            }
            Resource::Manifest($obj) => {
                let $api = $self.namespaced::<Manifest>($obj.metadata.namespace.as_deref());
                $body.await.map(Resource::Manifest)
            }
            Resource::Secret($obj) => {
                let $api = $self.namespaced::<Secret>($obj.metadata.namespace.as_deref());
                $body.await.map(Resource::Secret)
            }
            Resource::CustomResourceDefinition($obj) => {
                let $api = $self.cluster::<CustomResourceDefinition>();
                $body.await.map(Resource::CustomResourceDefinition)
            }
            Resource::Namespace($obj) => {
                let $api = $self.cluster::<Namespace>();
                $body.await.map(Resource::Namespace)
            }
        }
    };
}

#[async_trait]
impl ClusterClient for KubeCluster {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Resource, ClusterError> {
        let ns = Some(key.namespace.as_str());
        match kind {
            ResourceKind::Kyma => get_with(self.namespaced::<Kyma>(ns), kind, key).await.map(Resource::Kyma),
            ResourceKind::ModuleTemplate => get_with(self.namespaced::<ModuleTemplate>(ns), kind, key)
                .await
                .map(Resource::ModuleTemplate),
            ResourceKind::Manifest => get_with(self.namespaced::<Manifest>(ns), kind, key)
                .await
                .map(Resource::Manifest),
            ResourceKind::Secret => get_with(self.namespaced::<Secret>(ns), kind, key)
                .await
                .map(Resource::Secret),
            ResourceKind::CustomResourceDefinition => {
                get_with(self.cluster::<CustomResourceDefinition>(), kind, key)
                    .await
                    .map(Resource::CustomResourceDefinition)
            }
            ResourceKind::Namespace => get_with(self.cluster::<Namespace>(), kind, key)
                .await
                .map(Resource::Namespace),
        }
    }

    async fn list(&self, kind: ResourceKind, options: &ListOptions) -> Result<Vec<Resource>, ClusterError> {
        let ns = options.namespace.as_deref();
        let items = match kind {
            ResourceKind::Kyma => list_with(self.namespaced::<Kyma>(ns), kind, options)
                .await?
                .into_iter()
                .map(Resource::Kyma)
                .collect(),
            ResourceKind::ModuleTemplate => list_with(self.namespaced::<ModuleTemplate>(ns), kind, options)
                .await?
                .into_iter()
                .map(Resource::ModuleTemplate)
                .collect(),
            ResourceKind::Manifest => list_with(self.namespaced::<Manifest>(ns), kind, options)
                .await?
                .into_iter()
                .map(Resource::Manifest)
                .collect(),
            ResourceKind::Secret => list_with(self.namespaced::<Secret>(ns), kind, options)
                .await?
                .into_iter()
                .map(Resource::Secret)
                .collect(),
            ResourceKind::CustomResourceDefinition => {
                list_with(self.cluster::<CustomResourceDefinition>(), kind, options)
                    .await?
                    .into_iter()
                    .map(Resource::CustomResourceDefinition)
                    .collect()
            }
            ResourceKind::Namespace => list_with(self.cluster::<Namespace>(), kind, options)
                .await?
                .into_iter()
                .map(Resource::Namespace)
                .collect(),
        };
        Ok(items)
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, ClusterError> {
        let kind = resource.kind();
        with_object_api!(self, resource, |api, obj| create_with(api, kind, obj))
    }

    async fn update(&self, resource: &Resource) -> Result<Resource, ClusterError> {
        let kind = resource.kind();
        with_object_api!(self, resource, |api, obj| update_with(api, kind, obj))
    }

    async fn update_status(&self, resource: &Resource) -> Result<Resource, ClusterError> {
        let kind = resource.kind();
        with_object_api!(self, resource, |api, obj| update_status_with(api, kind, obj))
    }

    async fn apply(&self, resource: &Resource, field_manager: &str) -> Result<Resource, ClusterError> {
        let kind = resource.kind();
        with_object_api!(self, resource, |api, obj| apply_with(
            api,
            kind,
            obj,
            field_manager
        ))
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), ClusterError> {
        let ns = Some(key.namespace.as_str());
        match kind {
            ResourceKind::Kyma => delete_with(self.namespaced::<Kyma>(ns), kind, key).await,
            ResourceKind::ModuleTemplate => delete_with(self.namespaced::<ModuleTemplate>(ns), kind, key).await,
            ResourceKind::Manifest => delete_with(self.namespaced::<Manifest>(ns), kind, key).await,
            ResourceKind::Secret => delete_with(self.namespaced::<Secret>(ns), kind, key).await,
            ResourceKind::CustomResourceDefinition => {
                delete_with(self.cluster::<CustomResourceDefinition>(), kind, key).await
            }
            ResourceKind::Namespace => delete_with(self.cluster::<Namespace>(), kind, key).await,
        }
    }
}
