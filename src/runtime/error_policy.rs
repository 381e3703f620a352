//! # Error Policy
//!
//! Requeue decisions for failed reconciles and classification of watch
//! stream errors.

use crate::cluster::ObjectKey;
use crate::constants;
use crate::controller::backoff::BackoffState;
use crate::controller::reconciler::{KymaReconciler, ReconcileError};
use crate::crd::Kyma;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue a failed Kyma with Fibonacci backoff
///
/// Backoff is tracked per Kyma so one failing tenant does not slow down the others.
pub fn handle_reconciliation_error(
    obj: Arc<Kyma>,
    error: &ReconcileError,
    ctx: Arc<KymaReconciler>,
) -> Action {
    let key = ObjectKey::of(&obj.metadata);
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        kyma = %key,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!(error = ?error, "reconciliation error");
    metrics::increment_reconciliation_errors();

    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(key.to_string()).or_insert_with(|| {
                BackoffState::new(
                    constants::DEFAULT_ERROR_BACKOFF_MIN_MINUTES,
                    constants::DEFAULT_ERROR_BACKOFF_MAX_MINUTES,
                )
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!(error = %e, "failed to lock backoff states, using default backoff");
            (constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, 0)
        }
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        backoff_seconds,
        error_count,
        next_retry = %next_trigger_time.to_rfc3339(),
        "retrying with fibonacci backoff"
    );

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Kind of failure reported by the watch stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    TooManyRequests,
    NotFound,
    Other,
}

impl WatchErrorKind {
    pub fn classify(error: &str) -> Self {
        if error.contains("401") || error.contains("Unauthorized") {
            WatchErrorKind::Unauthorized
        } else if error.contains("410")
            || error.contains("too old resource version")
            || error.contains("Expired")
            || error.contains("Gone")
        {
            WatchErrorKind::Expired
        } else if error.contains("429")
            || error.contains("storage is (re)initializing")
            || error.contains("TooManyRequests")
        {
            WatchErrorKind::TooManyRequests
        } else if error.contains("ObjectNotFound")
            || (error.contains("404") && error.contains("not found"))
        {
            WatchErrorKind::NotFound
        } else {
            WatchErrorKind::Other
        }
    }
}

/// Handle a watch stream error, sleeping where the API server asks for it
///
/// Returns `Some(())` when the error is expected and the stream simply goes on.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match WatchErrorKind::classify(error_string) {
        WatchErrorKind::Unauthorized => {
            error!("watch authentication failed (401), RBAC of the lifecycle-manager service account may have been revoked");
            warn!(
                delay_secs = constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
                "waiting before retrying watch"
            );
            tokio::time::sleep(Duration::from_secs(
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
            ))
            .await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "watch resource version expired, watch will restart");
            None
        }
        WatchErrorKind::TooManyRequests => {
            let current = backoff.load(Ordering::Relaxed);
            warn!(backoff_ms = current, "API server throttling watch (429), backing off");
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!("kyma not found (likely deleted), continuing watch");
            Some(())
        }
        WatchErrorKind::Other => {
            error!(error = error_string, "controller stream error");
            tokio::time::sleep(Duration::from_secs(
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS,
            ))
            .await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{InMemoryCluster, SharedCluster};
    use crate::config::ControllerConfig;
    use crate::crd::KymaSpec;
    use crate::events::EventLog;
    use crate::remote::{ClientCache, RemoteClientLookup};

    fn reconciler() -> Arc<KymaReconciler> {
        let kcp: SharedCluster = Arc::new(InMemoryCluster::new("kcp"));
        Arc::new(KymaReconciler::new(
            kcp,
            RemoteClientLookup::new(Arc::new(ClientCache::new())),
            ControllerConfig::default(),
            Arc::new(EventLog::default()),
        ))
    }

    #[test]
    fn test_classify_watch_errors() {
        assert_eq!(
            WatchErrorKind::classify("ApiError: Unauthorized (401)"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            WatchErrorKind::classify("too old resource version: 12 (34)"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            WatchErrorKind::classify("429 TooManyRequests"),
            WatchErrorKind::TooManyRequests
        );
        assert_eq!(
            WatchErrorKind::classify("ObjectNotFound kyma-system/tenant"),
            WatchErrorKind::NotFound
        );
        assert_eq!(WatchErrorKind::classify("connection reset"), WatchErrorKind::Other);
    }

    #[test]
    fn test_error_backoff_grows_per_kyma() {
        let ctx = reconciler();
        let kyma = Arc::new(Kyma::new("tenant", KymaSpec::default()));
        let error = ReconcileError::SessionMissing(ObjectKey::of(&kyma.metadata));

        let first = handle_reconciliation_error(Arc::clone(&kyma), &error, Arc::clone(&ctx));
        handle_reconciliation_error(Arc::clone(&kyma), &error, Arc::clone(&ctx));
        let third = handle_reconciliation_error(Arc::clone(&kyma), &error, Arc::clone(&ctx));
        assert_eq!(first, Action::requeue(Duration::from_secs(60)));
        assert_eq!(third, Action::requeue(Duration::from_secs(120)));

        ctx.reset_backoff(&ObjectKey::of(&kyma.metadata));
        let after_reset = handle_reconciliation_error(kyma, &error, ctx);
        assert_eq!(after_reset, Action::requeue(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_throttled_watch_doubles_backoff() {
        let backoff = Arc::new(AtomicU64::new(1));
        assert!(handle_watch_stream_error("429", &backoff, 3).await.is_none());
        assert_eq!(backoff.load(Ordering::Relaxed), 2);
        assert!(handle_watch_stream_error("429", &backoff, 3).await.is_none());
        assert_eq!(backoff.load(Ordering::Relaxed), 3);
    }
}
