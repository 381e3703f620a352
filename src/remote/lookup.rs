//! # Remote Client Lookup
//!
//! Resolves the client for a tenant's runtime cluster: from the [`ClientCache`]
//! when present, otherwise through the connector registered for the tenant's
//! sync strategy, populating the cache on success.
//!
//! ## Strategies
//!
//! - `local-secret`: [`SecretConnector`] reads a kubeconfig from a secret in the
//!   control plane labelled `operator.kyma-project.io/kyma-name=<kyma>`
//! - `local-client`: [`LocalClientConnector`] hands out an injected client
//!
//! Remote clients are built with the same [`FlowControl`] as the control-plane
//! client.

use super::cache::ClientCache;
use super::error::RemoteError;
use crate::cluster::{
    build_client, ClusterClientExt, FlowControl, KubeCluster, ListOptions, ObjectKey, SharedCluster,
};
use crate::constants::{KUBECONFIG_SECRET_KEY, KYMA_NAME_LABEL};
use crate::crd::SyncStrategy;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Produces a fresh client for a tenant's runtime cluster
#[async_trait]
pub trait ClusterConnector: Send + Sync + std::fmt::Debug {
    async fn connect(&self, key: &ObjectKey) -> Result<SharedCluster, RemoteError>;
}

/// Hands out one injected client for every tenant
#[derive(Debug, Clone)]
pub struct LocalClientConnector {
    client: SharedCluster,
}

impl LocalClientConnector {
    pub fn new(client: SharedCluster) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterConnector for LocalClientConnector {
    async fn connect(&self, _key: &ObjectKey) -> Result<SharedCluster, RemoteError> {
        Ok(Arc::clone(&self.client))
    }
}

/// Builds a client from the kubeconfig stored in the tenant's access secret
#[derive(Debug, Clone)]
pub struct SecretConnector {
    control_plane: SharedCluster,
    flow: FlowControl,
}

impl SecretConnector {
    pub fn new(control_plane: SharedCluster, flow: FlowControl) -> Self {
        Self {
            control_plane,
            flow,
        }
    }

    /// First secret labelled with the kyma name in the kyma's namespace
    pub async fn access_secret(&self, key: &ObjectKey) -> Result<Secret, RemoteError> {
        let options =
            ListOptions::in_namespace(key.namespace.clone()).with_label(KYMA_NAME_LABEL, key.name.clone());
        let secrets: Vec<Secret> = self.control_plane.list_as(&options).await?;
        secrets
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::AccessSecretNotFound(key.clone()))
    }

    /// Kubeconfig YAML carried by the secret
    pub fn kubeconfig(secret: &Secret) -> Result<String, RemoteError> {
        let secret_name = secret.metadata.name.clone().unwrap_or_default();
        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
            .map(|value| value.0.clone())
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| RemoteError::InvalidAccessSecret {
                secret: secret_name.clone(),
                key: KUBECONFIG_SECRET_KEY.to_string(),
            })?;
        String::from_utf8(bytes).map_err(|e| RemoteError::Kubeconfig {
            secret: secret_name,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ClusterConnector for SecretConnector {
    async fn connect(&self, key: &ObjectKey) -> Result<SharedCluster, RemoteError> {
        let secret = self.access_secret(key).await?;
        let secret_name = secret.metadata.name.clone().unwrap_or_default();
        let yaml = Self::kubeconfig(&secret)?;

        let kubeconfig = Kubeconfig::from_yaml(&yaml).map_err(|e| RemoteError::Kubeconfig {
            secret: secret_name.clone(),
            message: e.to_string(),
        })?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| RemoteError::Kubeconfig {
                secret: secret_name,
                message: e.to_string(),
            })?;
        let client = build_client(config, self.flow).map_err(|e| RemoteError::ClientBuild(e.to_string()))?;

        debug!(kyma = %key, "built runtime cluster client from access secret");
        Ok(Arc::new(KubeCluster::new(client, format!("skr/{key}"))))
    }
}

/// Cache-first resolver of runtime-cluster clients
#[derive(Debug)]
pub struct RemoteClientLookup {
    cache: Arc<ClientCache>,
    connectors: HashMap<SyncStrategy, Arc<dyn ClusterConnector>>,
}

impl RemoteClientLookup {
    pub fn new(cache: Arc<ClientCache>) -> Self {
        Self {
            cache,
            connectors: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_connector(mut self, strategy: SyncStrategy, connector: Arc<dyn ClusterConnector>) -> Self {
        self.connectors.insert(strategy, connector);
        self
    }

    pub fn cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    /// Client for the tenant identified by `key`
    pub async fn lookup(&self, key: &ObjectKey, strategy: SyncStrategy) -> Result<SharedCluster, RemoteError> {
        if let Some(client) = self.cache.get(key) {
            return Ok(client);
        }

        let connector = self
            .connectors
            .get(&strategy)
            .ok_or_else(|| RemoteError::UnsupportedStrategy(format!("{strategy:?}")))?;
        let client = connector.connect(key).await?;
        self.cache.set(key.clone(), Arc::clone(&client));
        info!(kyma = %key, strategy = ?strategy, "cached new runtime cluster client");
        Ok(client)
    }

    /// Drop the cached client, forcing a reconnect on the next lookup
    pub fn evict(&self, key: &ObjectKey) {
        if self.cache.del(key) {
            info!(kyma = %key, "evicted runtime cluster client from cache");
        }
    }
}
