//! Watcher webhook installation and removal through the reconciler

mod common;

use async_trait::async_trait;
use common::{kyma, Harness, KCP_NAMESPACE};
use lifecycle_manager::cluster::{ClusterClientExt, InMemoryCluster, ObjectKey, Resource, ResourceKind};
use lifecycle_manager::config::{ControllerConfig, RequeueIntervals};
use lifecycle_manager::controller::reconciler::{WebhookError, WebhookManager};
use lifecycle_manager::controller::NextAction;
use lifecycle_manager::crd::{ConditionType, Kyma, State, CONDITION_FALSE, CONDITION_TRUE};
use lifecycle_manager::events::reasons;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct ScriptedWebhook {
    certificate_ready: AtomicBool,
    removal_fails: AtomicBool,
}

#[async_trait]
impl WebhookManager for ScriptedWebhook {
    async fn install(&self, kyma: &Kyma) -> Result<(), WebhookError> {
        if self.certificate_ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WebhookError::CertificateNotReady(kyma.name().to_string()))
        }
    }

    async fn remove(&self, _kyma: &Kyma) -> Result<(), WebhookError> {
        if self.removal_fails.load(Ordering::SeqCst) {
            Err(WebhookError::Failed("runtime cluster unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

fn harness(webhook: &Arc<ScriptedWebhook>) -> Harness {
    let config = ControllerConfig {
        in_kcp_mode: true,
        webhook_enabled: true,
        ..ControllerConfig::default()
    };
    let mut harness = Harness::with_config(config, InMemoryCluster::new("skr"));
    let manager: Arc<dyn WebhookManager> = webhook.clone();
    harness.reconciler = harness.reconciler.with_webhook_manager(manager);
    harness
        .kcp
        .insert(Resource::Kyma(kyma("tenant", &[], true)));
    harness
}

fn condition_status(kyma: &Kyma, condition_type: ConditionType) -> Option<String> {
    kyma.status
        .as_ref()
        .and_then(|status| status.condition(condition_type.as_str()))
        .map(|condition| condition.status.clone())
}

#[tokio::test]
async fn test_pending_certificate_keeps_kyma_processing() {
    let webhook = Arc::new(ScriptedWebhook::default());
    let harness = harness(&webhook);
    let key = ObjectKey::new(KCP_NAMESPACE, "tenant");

    let next = harness.reconcile(&key).await;
    assert_eq!(next, NextAction::RequeueAfter(RequeueIntervals::default().busy));
    let stored = harness.kcp_kyma(&key).await;
    assert_eq!(stored.state(), State::Processing);
    assert_eq!(
        condition_status(&stored, ConditionType::SkrWebhook).as_deref(),
        Some(CONDITION_FALSE)
    );

    webhook.certificate_ready.store(true, Ordering::SeqCst);
    harness.reconcile(&key).await;
    let stored = harness.kcp_kyma(&key).await;
    assert_eq!(stored.state(), State::Ready);
    assert_eq!(
        condition_status(&stored, ConditionType::SkrWebhook).as_deref(),
        Some(CONDITION_TRUE)
    );
}

#[tokio::test]
async fn test_failed_webhook_removal_retries_deletion() {
    let webhook = Arc::new(ScriptedWebhook::default());
    webhook.certificate_ready.store(true, Ordering::SeqCst);
    let harness = harness(&webhook);
    let key = ObjectKey::new(KCP_NAMESPACE, "tenant");
    harness.reconcile(&key).await;

    webhook.removal_fails.store(true, Ordering::SeqCst);
    harness
        .kcp
        .delete_as::<Kyma>(&key)
        .await
        .expect("deletion requested");
    let next = harness.reconcile(&key).await;
    assert_eq!(next, NextAction::RequeueAfter(RequeueIntervals::default().busy));
    assert_eq!(harness.kcp_kyma(&key).await.state(), State::Deleting);
    assert!(harness.events.has_reason(reasons::WEBHOOK_REMOVAL_FAILED));

    webhook.removal_fails.store(false, Ordering::SeqCst);
    assert_eq!(harness.reconcile(&key).await, NextAction::NoRequeue);
    assert!(!harness.kcp.contains(ResourceKind::Kyma, &key));
}
