//! # Sync Session
//!
//! Per-reconcile pairing of the control-plane client, the tenant's runtime
//! client, and the namespace the tenant's objects are synchronized into.
//!
//! A session is opened once at the start of a reconcile, passed by reference to
//! everything that needs the runtime cluster, and dropped when the reconcile ends.

use super::error::SessionError;
use super::lookup::RemoteClientLookup;
use crate::cluster::{
    ignore_not_found, ClusterClient, ClusterClientExt, ClusterError, ObjectKey, SharedCluster,
};
use crate::constants::{
    KYMA_FINALIZER, MANAGED_BY_LABEL, OPERATOR_NAME, OWNED_BY_ANNOTATION, SYNC_CONTEXT_FIELD_MANAGER,
    WATCHED_BY_LABEL,
};
use crate::crd::{crd_name, Kyma, KymaSpec};
use crate::events::{reasons, EventRecorder, EventSeverity};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceConversion, CustomResourceDefinition,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SyncSession {
    control_plane: SharedCluster,
    runtime: SharedCluster,
    namespace: String,
}

impl SyncSession {
    pub fn new(control_plane: SharedCluster, runtime: SharedCluster, namespace: impl Into<String>) -> Self {
        Self {
            control_plane,
            runtime,
            namespace: namespace.into(),
        }
    }

    /// Resolve the runtime client for `kyma` and make sure the sync namespace exists there
    pub async fn open(
        control_plane: SharedCluster,
        lookup: &RemoteClientLookup,
        kyma: &Kyma,
        namespace: &str,
    ) -> Result<Self, SessionError> {
        let key = ObjectKey::new(kyma.namespace(), kyma.name());
        let runtime = lookup.lookup(&key, kyma.sync_strategy()).await?;
        let session = Self::new(control_plane, runtime, namespace);
        session.ensure_namespace().await?;
        Ok(session)
    }

    pub fn control_plane(&self) -> &SharedCluster {
        &self.control_plane
    }

    pub fn runtime(&self) -> &SharedCluster {
        &self.runtime
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of the tenant's Kyma copy in the runtime cluster
    pub fn remote_kyma_key(&self, kyma: &Kyma) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), kyma.name())
    }

    /// Apply the sync namespace, labelled as managed by the lifecycle manager
    pub async fn ensure_namespace(&self) -> Result<(), SessionError> {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.to_string(),
                    OPERATOR_NAME.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        self.runtime
            .apply_as(&namespace, SYNC_CONTEXT_FIELD_MANAGER)
            .await
            .map_err(|source| SessionError::Namespace {
                namespace: self.namespace.clone(),
                source,
            })?;
        Ok(())
    }

    /// Copy a CRD from the control plane into the runtime cluster
    pub async fn install_crd(&self, plural: &str) -> Result<(), SessionError> {
        let name = crd_name(plural);
        let crd: CustomResourceDefinition = self
            .control_plane
            .get_as(&ObjectKey::cluster_scoped(name.clone()))
            .await
            .map_err(|source| SessionError::CrdInstallation {
                name: name.clone(),
                source,
            })?;
        self.patch_crd(&crd).await?;
        info!(crd = %name, cluster = self.runtime.identity(), "installed CRD in runtime cluster");
        Ok(())
    }

    /// Server-side apply the spec of `crd` to the runtime cluster
    ///
    /// Conversion webhooks only exist in the control plane, so the runtime copy
    /// never converts.
    pub async fn patch_crd(&self, crd: &CustomResourceDefinition) -> Result<(), SessionError> {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let mut spec = crd.spec.clone();
        spec.conversion = Some(CustomResourceConversion {
            strategy: "None".to_string(),
            webhook: None,
        });
        let desired = CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.to_string(),
                    OPERATOR_NAME.to_string(),
                )])),
                ..Default::default()
            },
            spec,
            status: None,
        };
        self.runtime
            .apply_as(&desired, OPERATOR_NAME)
            .await
            .map_err(|source| SessionError::CrdInstallation { name, source })?;
        Ok(())
    }

    /// Fetch the runtime copy of `kyma`, creating it (and the CRDs it needs) when missing
    ///
    /// A freshly created copy starts with the control-plane spec but no modules;
    /// module selection is owned by the runtime copy from then on.
    pub async fn create_or_fetch_remote_kyma(
        &self,
        kyma: &Kyma,
        events: &dyn EventRecorder,
    ) -> Result<Kyma, SessionError> {
        let key = self.remote_kyma_key(kyma);
        let fetched = match self.runtime.get_as::<Kyma>(&key).await {
            Err(ClusterError::NoMatch(_)) => {
                events
                    .publish(
                        kyma,
                        EventSeverity::Normal,
                        reasons::CRDS_MISSING,
                        "CRDs are missing in SKR and will be installed".to_string(),
                    )
                    .await;
                self.install_crd("moduletemplates").await?;
                self.install_crd("kymas").await?;
                events
                    .publish(
                        kyma,
                        EventSeverity::Normal,
                        reasons::CRD_INSTALLATION,
                        "CRDs were installed to SKR".to_string(),
                    )
                    .await;
                self.runtime.get_as::<Kyma>(&key).await
            }
            other => other,
        };

        match fetched {
            Ok(remote) => Ok(remote),
            Err(err) if err.is_not_found() => {
                if kyma.is_deleting() {
                    return Err(SessionError::NotFoundAndKcpKymaUnderDeleting);
                }
                let mut remote = Kyma::new(
                    &key.name,
                    KymaSpec {
                        modules: Vec::new(),
                        ..kyma.spec.clone()
                    },
                );
                remote.metadata.namespace = Some(key.namespace.clone());
                let created = self.runtime.create_as(&remote).await?;
                info!(kyma = %key, cluster = self.runtime.identity(), "created remote kyma");
                Ok(created)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Label and annotate the runtime copy so it can be traced back to its owner
    ///
    /// Returns the persisted copy when metadata changed.
    pub async fn synchronize_kyma_metadata(&self, kyma: &Kyma, remote: &Kyma) -> Result<Kyma, SessionError> {
        let mut desired = remote.clone();
        let labels = desired.metadata.labels.get_or_insert_with(BTreeMap::new);
        labels.insert(WATCHED_BY_LABEL.to_string(), OPERATOR_NAME.to_string());
        labels.insert(MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string());
        desired
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(
                OWNED_BY_ANNOTATION.to_string(),
                format!("{}/{}", kyma.namespace(), kyma.name()),
            );

        if desired.metadata == remote.metadata {
            return Ok(desired);
        }
        Ok(self.runtime.update_as(&desired).await?)
    }

    /// Push metadata and status of the control-plane kyma to the runtime copy
    pub async fn synchronize_remote_kyma(&self, kyma: &Kyma, remote: &Kyma) -> Result<(), SessionError> {
        if remote.is_deleting() {
            return Ok(());
        }
        let mut synced = self.synchronize_kyma_metadata(kyma, remote).await?;
        let status = synced.status_mut();
        if let Some(source) = &kyma.status {
            status.state = source.state;
            status.conditions.clone_from(&source.conditions);
            status.modules.clone_from(&source.modules);
            status.active_channel.clone_from(&source.active_channel);
            status.last_operation.clone_from(&source.last_operation);
        }
        self.runtime.update_status_as(&synced).await?;
        debug!(kyma = kyma.name(), "synchronized remote kyma status");
        Ok(())
    }

    /// Take module selection and channel from the runtime copy
    pub fn replace_spec(kyma: &mut Kyma, remote: &Kyma) {
        kyma.spec.modules.clone_from(&remote.spec.modules);
        kyma.spec.channel.clone_from(&remote.spec.channel);
    }

    pub async fn delete_remote_kyma(&self, kyma: &Kyma) -> Result<(), SessionError> {
        let key = self.remote_kyma_key(kyma);
        match self.runtime.delete_as::<Kyma>(&key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() || e.is_no_match() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Strip all finalizers from the runtime copy so it can disappear
    pub async fn remove_remote_finalizers(&self, kyma: &Kyma) -> Result<(), SessionError> {
        let key = self.remote_kyma_key(kyma);
        let remote = match self.runtime.get_as::<Kyma>(&key).await {
            Err(e) if e.is_no_match() => None,
            other => ignore_not_found(other)?,
        };
        let Some(mut remote) = remote else {
            return Ok(());
        };
        if remote.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            return Ok(());
        }
        remote.metadata.finalizers = Some(Vec::new());
        ignore_not_found(self.runtime.update_as(&remote).await)?;
        debug!(kyma = %key, finalizer = KYMA_FINALIZER, "removed finalizers from remote kyma");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{InMemoryCluster, Resource, ResourceKind};
    use crate::crd::{Module, ModuleTemplate, State};
    use crate::events::EventLog;
    use kube::CustomResourceExt;

    fn kcp_with_crds() -> Arc<InMemoryCluster> {
        let kcp = Arc::new(InMemoryCluster::new("kcp"));
        kcp.insert(Resource::CustomResourceDefinition(Kyma::crd()));
        kcp.insert(Resource::CustomResourceDefinition(ModuleTemplate::crd()));
        kcp
    }

    fn kcp_kyma() -> Kyma {
        let mut kyma = Kyma::new(
            "tenant",
            KymaSpec {
                channel: "fast".to_string(),
                modules: vec![Module {
                    name: "keda".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        kyma.metadata.namespace = Some("kcp-system".to_string());
        kyma
    }

    #[tokio::test]
    async fn test_create_remote_kyma_installs_crds_first() {
        let kcp = kcp_with_crds();
        let skr = Arc::new(
            InMemoryCluster::new("skr").without_crds(&[ResourceKind::Kyma, ResourceKind::ModuleTemplate]),
        );
        let session = SyncSession::new(kcp, skr.clone(), "kyma-system");
        let events = EventLog::default();

        let remote = session
            .create_or_fetch_remote_kyma(&kcp_kyma(), &events)
            .await
            .unwrap();

        assert_eq!(remote.namespace(), "kyma-system");
        assert_eq!(remote.spec.channel, "fast");
        assert!(remote.spec.modules.is_empty());
        assert!(skr.serves(ResourceKind::ModuleTemplate));
        assert!(events.has_reason(reasons::CRD_INSTALLATION));
    }

    #[tokio::test]
    async fn test_missing_remote_kyma_while_deleting() {
        let session = SyncSession::new(kcp_with_crds(), Arc::new(InMemoryCluster::new("skr")), "kyma-system");
        let mut kyma = kcp_kyma();
        kyma.metadata.deletion_timestamp = Some(serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap());

        let err = session
            .create_or_fetch_remote_kyma(&kyma, &EventLog::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFoundAndKcpKymaUnderDeleting));
    }

    #[tokio::test]
    async fn test_synchronize_remote_kyma_sets_metadata_and_status() {
        let skr = Arc::new(InMemoryCluster::new("skr"));
        let session = SyncSession::new(kcp_with_crds(), skr.clone(), "kyma-system");
        let mut kyma = kcp_kyma();
        let remote = session
            .create_or_fetch_remote_kyma(&kyma, &EventLog::default())
            .await
            .unwrap();

        kyma.status_mut().state = State::Ready;
        session.synchronize_remote_kyma(&kyma, &remote).await.unwrap();

        let synced: Kyma = skr.get_as(&session.remote_kyma_key(&kyma)).await.unwrap();
        assert_eq!(synced.state(), State::Ready);
        let labels = synced.metadata.labels.unwrap();
        assert_eq!(labels.get(WATCHED_BY_LABEL).map(String::as_str), Some(OPERATOR_NAME));
        assert_eq!(
            synced
                .metadata
                .annotations
                .unwrap()
                .get(OWNED_BY_ANNOTATION)
                .map(String::as_str),
            Some("kcp-system/tenant")
        );
    }

    #[tokio::test]
    async fn test_replace_spec_takes_modules_from_remote() {
        let mut kyma = kcp_kyma();
        let mut remote = Kyma::new("tenant", KymaSpec::default());
        remote.spec.channel = "regular".to_string();
        remote.spec.modules = vec![Module {
            name: "serverless".to_string(),
            ..Default::default()
        }];

        SyncSession::replace_spec(&mut kyma, &remote);
        assert_eq!(kyma.spec.channel, "regular");
        assert_eq!(kyma.spec.modules[0].name, "serverless");
    }

    #[tokio::test]
    async fn test_remove_remote_finalizers_releases_remote_kyma() {
        let skr = Arc::new(InMemoryCluster::new("skr"));
        let session = SyncSession::new(kcp_with_crds(), skr.clone(), "kyma-system");
        let mut remote = Kyma::new("tenant", KymaSpec::default());
        remote.metadata.namespace = Some("kyma-system".to_string());
        remote.metadata.finalizers = Some(vec![KYMA_FINALIZER.to_string()]);
        skr.create_as(&remote).await.unwrap();

        let kyma = kcp_kyma();
        session.delete_remote_kyma(&kyma).await.unwrap();
        assert!(skr.contains(ResourceKind::Kyma, &session.remote_kyma_key(&kyma)));

        session.remove_remote_finalizers(&kyma).await.unwrap();
        assert!(!skr.contains(ResourceKind::Kyma, &session.remote_kyma_key(&kyma)));
    }

    #[tokio::test]
    async fn test_ensure_namespace_applies_managed_namespace() {
        let skr = Arc::new(InMemoryCluster::new("skr"));
        let session = SyncSession::new(kcp_with_crds(), skr.clone(), "kyma-system");
        session.ensure_namespace().await.unwrap();

        let ns: Namespace = skr.get_as(&ObjectKey::cluster_scoped("kyma-system")).await.unwrap();
        assert_eq!(
            ns.metadata.labels.unwrap().get(MANAGED_BY_LABEL).map(String::as_str),
            Some(OPERATOR_NAME)
        );
    }
}
