//! # Deletion
//!
//! Tears down everything a Kyma owns before its finalizer is released:
//! watcher webhook, runtime catalog, cached client, remote finalizers and
//! finally the child Manifests on the control plane. Manifests still present
//! once the purge timeout has passed since the deletion timestamp lose their
//! finalizers so the Kyma can be released.

use crate::cluster::{ignore_not_found, ClusterClientExt, ObjectKey};
use crate::constants::KYMA_FINALIZER;
use crate::controller::reconciler::types::{KymaReconciler, NextAction, ReconcileError};
use crate::crd::{Kyma, Manifest};
use crate::events::{reasons, EventSeverity};
use crate::remote::SyncSession;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

impl KymaReconciler {
    pub(super) async fn handle_deleting_state(
        &self,
        kyma: &mut Kyma,
        session: Option<&SyncSession>,
    ) -> Result<NextAction, ReconcileError> {
        if let Some(webhook) = self.webhook.as_ref().filter(|_| self.webhook_enabled(kyma)) {
            if let Err(e) = webhook.remove(kyma).await {
                warn!(error = %e, "failed to remove watcher webhook, retrying");
                self.events
                    .publish(
                        kyma,
                        EventSeverity::Normal,
                        reasons::WEBHOOK_REMOVAL_FAILED,
                        e.to_string(),
                    )
                    .await;
                return Ok(NextAction::RequeueAfter(self.config.requeue.busy));
            }
        }

        if let Some(session) = session.filter(|_| self.sync_enabled(kyma)) {
            if let Err(e) = self.catalog.delete(session).await {
                let error = ReconcileError::from(e);
                self.events
                    .publish(
                        kyma,
                        EventSeverity::Warning,
                        reasons::DELETION,
                        error.to_string(),
                    )
                    .await;
                return Err(error);
            }
            self.remote.evict(&ObjectKey::of(&kyma.metadata));
            session.remove_remote_finalizers(kyma).await?;
            debug!("runtime cluster cleaned up");
        }

        let manifests = self.related_manifests(kyma).await?;
        if !manifests.is_empty() {
            match time_until_purge(kyma, self.config.purge_timeout) {
                Some(remaining) => {
                    info!(
                        remaining = manifests.len(),
                        purge_in_secs = remaining.as_secs(),
                        "waiting for manifests to be deleted"
                    );
                    for manifest in &manifests {
                        let key = ObjectKey::of(&manifest.metadata);
                        ignore_not_found(self.control_plane.delete_as::<Manifest>(&key).await)?;
                    }
                }
                None => self.purge_manifests(kyma, manifests).await?,
            }
            return Ok(NextAction::RequeueImmediately);
        }

        if let Some(finalizers) = kyma.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != KYMA_FINALIZER);
        }
        self.control_plane.update_as(&*kyma).await?;
        info!("removed kyma finalizer");
        Ok(NextAction::NoRequeue)
    }

    /// Strip the finalizers of Manifests that outlived the purge deadline and delete them
    async fn purge_manifests(&self, kyma: &Kyma, manifests: Vec<Manifest>) -> Result<(), ReconcileError> {
        warn!(
            remaining = manifests.len(),
            "deletion deadline passed, purging manifest finalizers"
        );
        for mut manifest in manifests {
            let key = ObjectKey::of(&manifest.metadata);
            if manifest.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
                manifest.metadata.finalizers = None;
                ignore_not_found(self.control_plane.update_as(&manifest).await)?;
            }
            ignore_not_found(self.control_plane.delete_as::<Manifest>(&key).await)?;
        }
        self.events
            .publish(
                kyma,
                EventSeverity::Warning,
                reasons::MANIFESTS_PURGED,
                format!(
                    "manifests still present {}s after deletion, finalizers removed",
                    self.config.purge_timeout.as_secs()
                ),
            )
            .await;
        Ok(())
    }
}

/// Time left until remaining Manifests are purged, `None` once the deadline has passed
fn time_until_purge(kyma: &Kyma, timeout: Duration) -> Option<Duration> {
    let Some(deleted_at) = deletion_time(kyma) else {
        return Some(timeout);
    };
    let Some(deadline) = TimeDelta::from_std(timeout)
        .ok()
        .and_then(|timeout| deleted_at.checked_add_signed(timeout))
    else {
        return Some(timeout);
    };
    (deadline - Utc::now())
        .to_std()
        .ok()
        .filter(|remaining| !remaining.is_zero())
}

fn deletion_time(kyma: &Kyma) -> Option<DateTime<Utc>> {
    let raw = serde_json::to_value(kyma.metadata.deletion_timestamp.as_ref()?).ok()?;
    DateTime::parse_from_rfc3339(raw.as_str()?)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::KymaSpec;

    fn deleted_at(offset: TimeDelta) -> Kyma {
        let mut kyma = Kyma::new("tenant", KymaSpec::default());
        let timestamp = (Utc::now() + offset).to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        kyma.metadata.deletion_timestamp =
            Some(serde_json::from_value(serde_json::Value::String(timestamp)).unwrap());
        kyma
    }

    #[test]
    fn test_purge_deadline_in_the_future() {
        let kyma = deleted_at(TimeDelta::zero());
        let remaining = time_until_purge(&kyma, Duration::from_secs(300)).unwrap();
        assert!(remaining > Duration::from_secs(290));
        assert!(remaining <= Duration::from_secs(300));
    }

    #[test]
    fn test_purge_deadline_passed() {
        let kyma = deleted_at(TimeDelta::minutes(-10));
        assert_eq!(time_until_purge(&kyma, Duration::from_secs(300)), None);
    }

    #[test]
    fn test_no_deletion_timestamp_waits_full_timeout() {
        let kyma = Kyma::new("tenant", KymaSpec::default());
        assert_eq!(
            time_until_purge(&kyma, Duration::from_secs(60)),
            Some(Duration::from_secs(60))
        );
    }
}
