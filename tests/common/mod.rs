//! Shared fixtures for the integration tests

#![allow(dead_code, reason = "each test binary uses a different subset")]

use kube::CustomResourceExt;
use lifecycle_manager::cluster::{
    ClusterClientExt, InMemoryCluster, ObjectKey, Resource, ResourceKind, SharedCluster,
};
use lifecycle_manager::config::ControllerConfig;
use lifecycle_manager::constants::MODULE_NAME_LABEL;
use lifecycle_manager::controller::{KymaReconciler, NextAction};
use lifecycle_manager::crd::{
    Kyma, KymaSpec, Manifest, ManifestStatus, Module, ModuleTemplate, ModuleTemplateSpec, State,
    SyncConfig, SyncStrategy,
};
use lifecycle_manager::events::{EventLog, EventRecorder};
use lifecycle_manager::remote::{
    ClientCache, ClusterConnector, LocalClientConnector, RemoteClientLookup,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const KCP_NAMESPACE: &str = "kcp-system";

pub struct Harness {
    pub kcp: Arc<InMemoryCluster>,
    pub skr: Arc<InMemoryCluster>,
    pub events: Arc<EventLog>,
    pub reconciler: KymaReconciler,
}

impl Harness {
    /// Reconciler whose local-client strategy points at `skr`
    pub fn new(in_kcp_mode: bool, skr: InMemoryCluster) -> Self {
        Self::with_config(
            ControllerConfig {
                in_kcp_mode,
                ..ControllerConfig::default()
            },
            skr,
        )
    }

    pub fn with_config(config: ControllerConfig, skr: InMemoryCluster) -> Self {
        let kcp = Arc::new(InMemoryCluster::new("kcp"));
        kcp.insert(Resource::CustomResourceDefinition(Kyma::crd()));
        kcp.insert(Resource::CustomResourceDefinition(ModuleTemplate::crd()));
        let skr = Arc::new(skr);

        let runtime: SharedCluster = skr.clone();
        let connector: Arc<dyn ClusterConnector> = Arc::new(LocalClientConnector::new(runtime));
        let remote = RemoteClientLookup::new(Arc::new(ClientCache::new()))
            .with_connector(SyncStrategy::LocalClient, connector);

        let events = Arc::new(EventLog::default());
        let recorder: Arc<dyn EventRecorder> = events.clone();
        let control_plane: SharedCluster = kcp.clone();
        let reconciler = KymaReconciler::new(control_plane, remote, config, recorder);
        Self {
            kcp,
            skr,
            events,
            reconciler,
        }
    }

    /// Reconcile until the controller asks for anything but an immediate requeue
    pub async fn reconcile(&self, key: &ObjectKey) -> NextAction {
        for _ in 0..10 {
            let next = self
                .reconciler
                .reconcile_key(key.clone())
                .await
                .expect("reconcile failed");
            if next != NextAction::RequeueImmediately {
                return next;
            }
        }
        panic!("kyma {key} did not settle within 10 passes");
    }

    pub async fn kcp_kyma(&self, key: &ObjectKey) -> Kyma {
        self.kcp.get_as(key).await.expect("kyma in control plane")
    }

    pub async fn set_manifest_state(&self, name: &str, state: State) {
        let key = ObjectKey::new(KCP_NAMESPACE, name);
        let mut manifest: Manifest = self.kcp.get_as(&key).await.expect("manifest");
        manifest.status = Some(ManifestStatus {
            state,
            message: None,
        });
        self.kcp
            .update_status_as(&manifest)
            .await
            .expect("manifest status update");
    }

    pub async fn set_manifest_finalizers(&self, finalizers: &[&str]) {
        for resource in self.kcp.objects(ResourceKind::Manifest) {
            let mut manifest: Manifest = self.kcp.get_as(&resource.key()).await.expect("manifest");
            manifest.metadata.finalizers =
                Some(finalizers.iter().map(ToString::to_string).collect());
            self.kcp
                .update_as(&manifest)
                .await
                .expect("manifest finalizers update");
        }
    }

    pub fn manifest_count(&self) -> usize {
        self.kcp.objects(ResourceKind::Manifest).len()
    }
}

pub fn kyma(name: &str, modules: &[&str], sync: bool) -> Kyma {
    let mut kyma = Kyma::new(
        name,
        KymaSpec {
            channel: "regular".to_string(),
            modules: modules
                .iter()
                .map(|module| Module {
                    name: (*module).to_string(),
                    ..Module::default()
                })
                .collect(),
            sync: SyncConfig {
                enabled: sync,
                namespace: String::new(),
                strategy: SyncStrategy::LocalClient,
            },
        },
    );
    kyma.metadata.namespace = Some(KCP_NAMESPACE.to_string());
    kyma
}

pub fn template(module: &str, channel: &str, version: &str) -> ModuleTemplate {
    let mut template = ModuleTemplate::new(
        &format!("{module}-{channel}"),
        ModuleTemplateSpec {
            channel: channel.to_string(),
            descriptor: json!({
                "component": {"name": format!("kyma-project.io/module/{module}"), "version": version}
            }),
            data: None,
        },
    );
    template.metadata.namespace = Some(KCP_NAMESPACE.to_string());
    template.metadata.labels = Some(BTreeMap::from([(
        MODULE_NAME_LABEL.to_string(),
        module.to_string(),
    )]));
    template
}
