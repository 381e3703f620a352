//! # Kyma Reconciliation
//!
//! State machine driving a Kyma from creation to removal of its finalizer:
//!
//! ```text
//! "" -> Processing -> {Ready, Warning, Error} -> Deleting -> (finalizer removed)
//! ```
//!
//! One pass, in order:
//!
//! 1. Fetch the Kyma; gone means done
//! 2. Skip-reconciliation label: requeue after the success interval
//! 3. Initialize conditions for the enabled features
//! 4. Open the sync session (sync enabled only)
//! 5. Deletion requested: delete the remote Kyma and switch to Deleting
//! 6. Ensure finalizer and managed-by label
//! 7. Sync CRDs and the remote Kyma's spec and metadata (sync enabled only)
//! 8. Dispatch on state: initial, processing or deleting
//! 9. Push the resulting status to the remote Kyma (sync enabled only)
//!
//! Every write to the control-plane Kyma that changes metadata ends the pass
//! with an immediate requeue so the next pass starts from the persisted object.

mod deletion;
mod processing;
mod sync;

use super::status;
use super::types::{KymaReconciler, NextAction, ReconcileError};
use crate::cluster::{ignore_not_found, ClusterClientExt, ObjectKey};
use crate::constants::{KYMA_FINALIZER, MANAGED_BY_LABEL, OPERATOR_NAME};
use crate::crd::{Kyma, State};
use crate::events::{reasons, EventSeverity};
use crate::observability::metrics;
use crate::remote::SyncSession;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Entry point for the kube-runtime controller
pub async fn reconcile(kyma: Arc<Kyma>, ctx: Arc<KymaReconciler>) -> Result<Action, ReconcileError> {
    let key = ObjectKey::of(&kyma.metadata);
    let next = ctx.reconcile_key(key.clone()).await?;
    ctx.reset_backoff(&key);
    Ok(next.into_action())
}

/// Add the Kyma finalizer and the managed-by label; true when the object changed
pub fn ensure_labels_and_finalizers(kyma: &mut Kyma) -> bool {
    let mut changed = false;
    if !kyma.is_deleting() && !kyma.has_kyma_finalizer() {
        kyma.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(KYMA_FINALIZER.to_string());
        changed = true;
    }
    let labels = kyma.metadata.labels.get_or_insert_with(BTreeMap::new);
    if labels.get(MANAGED_BY_LABEL).map(String::as_str) != Some(OPERATOR_NAME) {
        labels.insert(MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string());
        changed = true;
    }
    changed
}

impl KymaReconciler {
    /// Reconcile the Kyma stored under `key` once
    pub async fn reconcile_key(&self, key: ObjectKey) -> Result<NextAction, ReconcileError> {
        let span = tracing::info_span!("kyma.reconcile", kyma = %key);
        async move {
            metrics::increment_reconciliations();
            let start = Instant::now();

            let Some(mut kyma) = ignore_not_found(self.control_plane.get_as::<Kyma>(&key).await)?
            else {
                debug!("kyma not found, probably already deleted");
                return Ok(NextAction::NoRequeue);
            };
            let result = self.reconcile_kyma(&mut kyma).await;

            metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
            if let Ok(next) = &result {
                if *next != NextAction::NoRequeue {
                    metrics::increment_requeues_total(next.reason());
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn reconcile_kyma(&self, kyma: &mut Kyma) -> Result<NextAction, ReconcileError> {
        let sync_enabled = self.sync_enabled(kyma);
        status::init_conditions(kyma, sync_enabled, self.webhook_enabled(kyma));

        if kyma.skip_reconciliation() {
            debug!("skipping reconciliation because of label");
            return Ok(NextAction::RequeueAfter(self.config.requeue.success));
        }

        let session = if sync_enabled {
            match self.open_session(kyma).await {
                Ok(session) => Some(session),
                Err(next) => return next,
            }
        } else {
            None
        };

        if kyma.is_deleting() && kyma.state() != State::Deleting {
            if let Some(session) = &session {
                if let Err(e) = session.delete_remote_kyma(kyma).await {
                    return self
                        .requeue_with_error(kyma, reasons::REMOTE_KYMA_ERROR, &e.into())
                        .await;
                }
                info!("deleted remote kyma");
            }
            self.update_state(kyma, State::Deleting, "waiting for modules to be deleted")
                .await?;
            return Ok(NextAction::RequeueImmediately);
        }

        if ensure_labels_and_finalizers(kyma) {
            self.control_plane.update_as(&*kyma).await?;
            return Ok(NextAction::RequeueImmediately);
        }

        if kyma.state() == State::Deleting {
            return self.handle_deleting_state(kyma, session.as_ref()).await;
        }

        if let Some(session) = &session {
            if let Some(next) = self.sync_from_remote(kyma, session).await? {
                return Ok(next);
            }
        }

        let next = if kyma.state() == State::Unset {
            self.handle_initial_state(kyma).await?
        } else {
            self.handle_processing_state(kyma, session.as_ref()).await?
        };

        if let Some(session) = &session {
            if let Err(e) = self.sync_status_to_remote(kyma, session).await {
                return self
                    .requeue_with_error(kyma, reasons::REMOTE_KYMA_ERROR, &e)
                    .await;
            }
        }
        Ok(next)
    }

    /// Open the sync session, or decide how the pass ends when that fails
    async fn open_session(
        &self,
        kyma: &mut Kyma,
    ) -> Result<SyncSession, Result<NextAction, ReconcileError>> {
        let namespace = self.sync_namespace(kyma).to_string();
        let error = match SyncSession::open(
            Arc::clone(&self.control_plane),
            &self.remote,
            kyma,
            &namespace,
        )
        .await
        {
            Ok(session) => return Ok(session),
            Err(error) => error,
        };

        if kyma.is_deleting() && error.is_access_secret_not_found() {
            info!("access secret not found for kyma, assuming already deleted cluster");
            self.events
                .publish(
                    kyma,
                    EventSeverity::Normal,
                    reasons::ACCESS_SECRET_NOT_FOUND,
                    error.to_string(),
                )
                .await;
            kyma.metadata.finalizers = Some(Vec::new());
            return Err(match self.control_plane.update_as(&*kyma).await {
                Ok(_) => Ok(NextAction::RequeueImmediately),
                Err(e) => Err(e.into()),
            });
        }

        if error.is_unauthorized() {
            warn!("runtime cluster rejected credentials, resetting cached client");
        }
        self.remote.evict(&ObjectKey::of(&kyma.metadata));
        Err(self
            .requeue_with_error(kyma, reasons::SYNC_CONTEXT_ERROR, &error.into())
            .await)
    }

    async fn handle_initial_state(&self, kyma: &mut Kyma) -> Result<NextAction, ReconcileError> {
        self.update_state(kyma, State::Processing, "started processing")
            .await?;
        self.events
            .publish(
                kyma,
                EventSeverity::Normal,
                reasons::STATE_CHANGED,
                "started processing".to_string(),
            )
            .await;
        Ok(NextAction::RequeueImmediately)
    }

    /// Forget the error backoff of `key` after a successful pass
    pub fn reset_backoff(&self, key: &ObjectKey) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(&key.to_string());
        }
    }

    /// Set state and persist the status, keeping the in-memory spec
    pub(crate) async fn update_state(
        &self,
        kyma: &mut Kyma,
        state: State,
        message: &str,
    ) -> Result<(), ReconcileError> {
        if kyma.state() != state {
            metrics::increment_state_transitions(state.as_str());
        }
        status::set_state(kyma, state, message);
        let persisted = self.control_plane.update_status_as(&*kyma).await?;
        kyma.metadata.resource_version = persisted.metadata.resource_version;
        Ok(())
    }

    /// Record `error` as Error state with a warning event and retry after the error interval
    pub(crate) async fn requeue_with_error(
        &self,
        kyma: &mut Kyma,
        reason: &str,
        error: &ReconcileError,
    ) -> Result<NextAction, ReconcileError> {
        warn!(error = %error, reason, "reconciliation failed");
        self.update_state(kyma, State::Error, &error.to_string())
            .await?;
        self.events
            .publish(kyma, EventSeverity::Warning, reason, error.to_string())
            .await;
        Ok(NextAction::RequeueAfter(self.config.requeue.error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::KymaSpec;

    #[test]
    fn test_ensure_labels_and_finalizers_is_idempotent() {
        let mut kyma = Kyma::new("tenant", KymaSpec::default());
        assert!(ensure_labels_and_finalizers(&mut kyma));
        assert!(kyma.has_kyma_finalizer());
        assert!(!ensure_labels_and_finalizers(&mut kyma));
    }

    #[test]
    fn test_no_finalizer_added_while_deleting() {
        let mut kyma = Kyma::new("tenant", KymaSpec::default());
        kyma.metadata.deletion_timestamp =
            Some(serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap());
        ensure_labels_and_finalizers(&mut kyma);
        assert!(!kyma.has_kyma_finalizer());
    }
}
