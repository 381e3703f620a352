//! # Processing
//!
//! Manifests, catalog and webhook are reconciled concurrently; the first
//! failure cancels the others and the Kyma goes to Error.

use crate::catalog::catalog_templates;
use crate::cluster::{ClusterClientExt, ListOptions, ObjectKey};
use crate::controller::reconciler::status;
use crate::controller::reconciler::types::{KymaReconciler, NextAction, ReconcileError};
use crate::crd::{ConditionType, Kyma, ModuleTemplate, State};
use crate::events::reasons;
use crate::remote::SyncSession;
use tracing::info;

impl KymaReconciler {
    pub(super) async fn handle_processing_state(
        &self,
        kyma: &mut Kyma,
        session: Option<&SyncSession>,
    ) -> Result<NextAction, ReconcileError> {
        let outcome = {
            let current: &Kyma = kyma;
            futures::try_join!(
                self.reconcile_manifests(current, session),
                self.sync_catalog(current, session),
                self.install_webhook(current),
            )
        };

        let (modules, catalog_synced, webhook_ready) = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                if matches!(error, ReconcileError::Catalog(_)) {
                    status::update_condition(kyma, ConditionType::ModuleCatalog, false);
                }
                return self
                    .requeue_with_error(kyma, reasons::PROCESSING_ERROR, &error)
                    .await;
            }
        };

        kyma.status_mut().modules = modules;
        let all_ready = status::all_modules_ready(kyma);
        status::update_condition(kyma, ConditionType::Modules, all_ready);
        if let Some(synced) = catalog_synced {
            status::update_condition(kyma, ConditionType::ModuleCatalog, synced);
        }
        if let Some(ready) = webhook_ready {
            status::update_condition(kyma, ConditionType::SkrWebhook, ready);
        }

        let state = kyma
            .status
            .as_ref()
            .map(status::determine_state)
            .unwrap_or_default();
        let message = if state == State::Ready {
            if kyma.state() != State::Ready {
                info!("kyma is ready");
            }
            "kyma is ready"
        } else {
            "waiting for all modules to become ready"
        };
        self.update_state(kyma, state, message).await?;
        Ok(NextAction::RequeueAfter(self.config.requeue.for_state(state)))
    }

    /// Push the tenant's catalog; `None` when sync is disabled
    async fn sync_catalog(
        &self,
        kyma: &Kyma,
        session: Option<&SyncSession>,
    ) -> Result<Option<bool>, ReconcileError> {
        if !self.sync_enabled(kyma) {
            return Ok(None);
        }
        let session =
            session.ok_or_else(|| ReconcileError::SessionMissing(ObjectKey::of(&kyma.metadata)))?;
        let templates = self
            .control_plane
            .list_as::<ModuleTemplate>(&ListOptions::default())
            .await?;
        self.catalog
            .create_or_update(session, &catalog_templates(kyma, &templates))
            .await?;
        Ok(Some(true))
    }

    /// Install the watcher webhook; `Some(false)` while its certificate is pending
    async fn install_webhook(&self, kyma: &Kyma) -> Result<Option<bool>, ReconcileError> {
        let Some(webhook) = self.webhook.as_ref().filter(|_| self.webhook_enabled(kyma)) else {
            return Ok(None);
        };
        match webhook.install(kyma).await {
            Ok(()) => Ok(Some(true)),
            Err(e) if e.is_certificate_not_ready() => {
                info!(error = %e, "watcher webhook certificate not ready yet");
                Ok(Some(false))
            }
            Err(e) => Err(e.into()),
        }
    }
}
