//! Kyma lifecycle with a runtime cluster: remote Kyma, CRDs, catalog and cleanup

mod common;

use common::{kyma, template, Harness, KCP_NAMESPACE};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;
use lifecycle_manager::cluster::{
    ClusterClientExt, InMemoryCluster, ObjectKey, Resource, ResourceKind, SharedCluster,
};
use lifecycle_manager::config::{ControllerConfig, RequeueIntervals};
use lifecycle_manager::constants::{
    CATALOG_SYNC_FIELD_MANAGER, DEFAULT_REMOTE_SYNC_NAMESPACE, KYMA_FINALIZER,
    OWNED_BY_ANNOTATION,
};
use lifecycle_manager::controller::{KymaReconciler, NextAction};
use lifecycle_manager::crd::{crd_name, Kyma, Manifest, Module, ModuleTemplate, State, SyncStrategy};
use lifecycle_manager::events::{reasons, EventLog, EventRecorder};
use lifecycle_manager::remote::{ClientCache, ClusterConnector, RemoteClientLookup, SecretConnector};
use std::sync::Arc;

fn kyma_key() -> ObjectKey {
    ObjectKey::new(KCP_NAMESPACE, "tenant")
}

fn remote_key() -> ObjectKey {
    ObjectKey::new(DEFAULT_REMOTE_SYNC_NAMESPACE, "tenant")
}

fn remote_template(name: &str, manager: &str) -> ModuleTemplate {
    let mut remote = template(name, "regular", "0.1.0");
    remote.metadata.namespace = Some(DEFAULT_REMOTE_SYNC_NAMESPACE.to_string());
    remote.metadata.managed_fields = Some(vec![ManagedFieldsEntry {
        manager: Some(manager.to_string()),
        operation: Some("Apply".to_string()),
        ..ManagedFieldsEntry::default()
    }]);
    remote
}

fn remote_template_names(skr: &InMemoryCluster) -> Vec<String> {
    skr.objects(ResourceKind::ModuleTemplate)
        .iter()
        .map(|resource| resource.key().name)
        .collect()
}

/// Runtime cluster without the Kyma CRD, holding one foreign and one stale catalog template
fn runtime_cluster() -> InMemoryCluster {
    let skr = InMemoryCluster::new("skr").without_crds(&[ResourceKind::Kyma]);
    skr.insert(Resource::ModuleTemplate(remote_template("custom", "kubectl")));
    skr.insert(Resource::ModuleTemplate(remote_template(
        "retired",
        CATALOG_SYNC_FIELD_MANAGER,
    )));
    skr
}

#[tokio::test]
async fn test_remote_kyma_catalog_and_status_are_synchronized() {
    let harness = Harness::new(true, runtime_cluster());
    for module in ["keda", "serverless"] {
        harness
            .kcp
            .insert(Resource::ModuleTemplate(template(module, "regular", "1.0.0")));
    }
    harness
        .kcp
        .insert(Resource::Kyma(kyma("tenant", &["keda"], true)));
    let intervals = RequeueIntervals::default();

    let next = harness.reconcile(&kyma_key()).await;
    assert_eq!(next, NextAction::RequeueAfter(intervals.success));

    // CRDs were installed and the remote copy created without modules
    assert!(harness.skr.serves(ResourceKind::Kyma));
    assert!(harness.skr.contains(
        ResourceKind::CustomResourceDefinition,
        &ObjectKey::cluster_scoped(crd_name("kymas"))
    ));
    assert!(harness.events.has_reason(reasons::CRDS_MISSING));
    let remote: Kyma = harness.skr.get_as(&remote_key()).await.expect("remote kyma");
    assert!(remote.spec.modules.is_empty());
    assert_eq!(
        remote
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(OWNED_BY_ANNOTATION))
            .map(String::as_str),
        Some("kcp-system/tenant")
    );
    assert_eq!(remote.state(), State::Ready);

    // the runtime copy owns module selection
    assert_eq!(harness.manifest_count(), 0);
    let stored = harness.kcp_kyma(&kyma_key()).await;
    assert_eq!(stored.state(), State::Ready);
    assert!(stored
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key("kyma-kcp-crd-generation")));

    // catalog: KCP templates added, foreign kept, stale owned one removed
    let mut names = remote_template_names(&harness.skr);
    names.sort();
    assert_eq!(names, vec!["custom", "keda-regular", "serverless-regular"]);

    let mut remote = remote;
    remote.spec.modules.push(Module {
        name: "keda".to_string(),
        ..Module::default()
    });
    harness
        .skr
        .update_as(&remote)
        .await
        .expect("module enabled remotely");

    let next = harness.reconcile(&kyma_key()).await;
    assert_eq!(next, NextAction::RequeueAfter(intervals.busy));
    let manifest: Manifest = harness
        .kcp
        .get_as(&ObjectKey::new(KCP_NAMESPACE, "tenant-keda"))
        .await
        .expect("manifest for remotely enabled module");
    assert!(manifest.spec.remote);

    harness.set_manifest_state("tenant-keda", State::Ready).await;
    harness.reconcile(&kyma_key()).await;
    let remote: Kyma = harness.skr.get_as(&remote_key()).await.expect("remote kyma");
    assert_eq!(remote.state(), State::Ready);
    assert_eq!(
        remote.module_status("keda").map(|m| m.state),
        Some(State::Ready)
    );
}

#[tokio::test]
async fn test_deletion_cleans_up_the_runtime_cluster() {
    let harness = Harness::new(true, runtime_cluster());
    harness
        .kcp
        .insert(Resource::ModuleTemplate(template("keda", "regular", "1.0.0")));
    harness
        .kcp
        .insert(Resource::Kyma(kyma("tenant", &[], true)));
    harness.reconcile(&kyma_key()).await;
    assert_eq!(harness.reconciler.remote().cache().len(), 1);

    harness
        .kcp
        .delete_as::<Kyma>(&kyma_key())
        .await
        .expect("deletion requested");
    let next = harness.reconcile(&kyma_key()).await;

    assert_eq!(next, NextAction::NoRequeue);
    assert!(!harness.kcp.contains(ResourceKind::Kyma, &kyma_key()));
    assert!(!harness.skr.contains(ResourceKind::Kyma, &remote_key()));
    assert_eq!(remote_template_names(&harness.skr), vec!["custom"]);
}

fn secret_based_reconciler(kcp: &Arc<InMemoryCluster>, events: &Arc<EventLog>) -> KymaReconciler {
    let control_plane: SharedCluster = kcp.clone();
    let config = ControllerConfig {
        in_kcp_mode: true,
        ..ControllerConfig::default()
    };
    let connector: Arc<dyn ClusterConnector> =
        Arc::new(SecretConnector::new(control_plane.clone(), config.flow));
    let remote = RemoteClientLookup::new(Arc::new(ClientCache::new()))
        .with_connector(SyncStrategy::LocalSecret, connector);
    let recorder: Arc<dyn EventRecorder> = events.clone();
    KymaReconciler::new(control_plane, remote, config, recorder)
}

fn secret_strategy_kyma() -> Kyma {
    let mut tenant = kyma("tenant", &[], true);
    tenant.spec.sync.strategy = SyncStrategy::LocalSecret;
    tenant.metadata.finalizers = Some(vec![KYMA_FINALIZER.to_string()]);
    tenant
}

#[tokio::test]
async fn test_missing_access_secret_releases_a_deleting_kyma() {
    let kcp = Arc::new(InMemoryCluster::new("kcp"));
    let events = Arc::new(EventLog::default());
    let reconciler = secret_based_reconciler(&kcp, &events);
    kcp.insert(Resource::Kyma(secret_strategy_kyma()));
    kcp.delete_as::<Kyma>(&kyma_key())
        .await
        .expect("deletion requested");

    let next = reconciler
        .reconcile_key(kyma_key())
        .await
        .expect("reconcile");

    assert_eq!(next, NextAction::RequeueImmediately);
    assert!(!kcp.contains(ResourceKind::Kyma, &kyma_key()));
    assert!(events.has_reason(reasons::ACCESS_SECRET_NOT_FOUND));
}

#[tokio::test]
async fn test_missing_access_secret_is_an_error_while_active() {
    let kcp = Arc::new(InMemoryCluster::new("kcp"));
    let events = Arc::new(EventLog::default());
    let reconciler = secret_based_reconciler(&kcp, &events);
    kcp.insert(Resource::Kyma(secret_strategy_kyma()));

    let next = reconciler
        .reconcile_key(kyma_key())
        .await
        .expect("reconcile");

    assert_eq!(next, NextAction::RequeueAfter(RequeueIntervals::default().error));
    let stored: Kyma = kcp.get_as(&kyma_key()).await.expect("kyma");
    assert_eq!(stored.state(), State::Error);
    assert!(events.has_reason(reasons::SYNC_CONTEXT_ERROR));
}
