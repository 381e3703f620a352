//! Controller settings

use super::env_var_or_default;
use crate::cluster::FlowControl;
use crate::constants::{
    DEFAULT_CATALOG_SYNC_CONCURRENCY, DEFAULT_CLIENT_BURST, DEFAULT_CLIENT_QPS,
    DEFAULT_IN_KCP_MODE, DEFAULT_MAX_CONCURRENT_RECONCILES, DEFAULT_PURGE_TIMEOUT_SECS,
    DEFAULT_REMOTE_SYNC_NAMESPACE, DEFAULT_REQUEUE_BUSY_INTERVAL_SECS, DEFAULT_REQUEUE_ERROR_INTERVAL_SECS,
    DEFAULT_REQUEUE_SUCCESS_INTERVAL_SECS, DEFAULT_REQUEUE_WARNING_INTERVAL_SECS,
    DEFAULT_WEBHOOK_ENABLED,
};
use crate::crd::State;
use std::time::Duration;

/// How long to wait before reconciling a Kyma again, by outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeueIntervals {
    pub success: Duration,
    pub busy: Duration,
    pub error: Duration,
    pub warning: Duration,
}

impl Default for RequeueIntervals {
    fn default() -> Self {
        Self {
            success: Duration::from_secs(DEFAULT_REQUEUE_SUCCESS_INTERVAL_SECS),
            busy: Duration::from_secs(DEFAULT_REQUEUE_BUSY_INTERVAL_SECS),
            error: Duration::from_secs(DEFAULT_REQUEUE_ERROR_INTERVAL_SECS),
            warning: Duration::from_secs(DEFAULT_REQUEUE_WARNING_INTERVAL_SECS),
        }
    }
}

impl RequeueIntervals {
    /// Interval after a processing pass that ended in `state`
    pub fn for_state(&self, state: State) -> Duration {
        match state {
            State::Ready => self.success,
            State::Warning => self.warning,
            State::Error => self.error,
            _ => self.busy,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub requeue: RequeueIntervals,
    /// Namespace in the runtime cluster holding the remote Kyma and the catalog
    pub remote_sync_namespace: String,
    /// Whether the controller runs in the control plane and syncs runtime clusters
    pub in_kcp_mode: bool,
    /// Whether the runtime watcher webhook is installed into runtime clusters
    pub webhook_enabled: bool,
    pub flow: FlowControl,
    /// Grace period after deletion before remaining Manifests lose their finalizers
    pub purge_timeout: Duration,
    pub catalog_sync_concurrency: usize,
    pub max_concurrent_reconciles: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue: RequeueIntervals::default(),
            remote_sync_namespace: DEFAULT_REMOTE_SYNC_NAMESPACE.to_string(),
            in_kcp_mode: DEFAULT_IN_KCP_MODE,
            webhook_enabled: DEFAULT_WEBHOOK_ENABLED,
            flow: FlowControl {
                qps: DEFAULT_CLIENT_QPS,
                burst: DEFAULT_CLIENT_BURST,
            },
            purge_timeout: Duration::from_secs(DEFAULT_PURGE_TIMEOUT_SECS),
            catalog_sync_concurrency: DEFAULT_CATALOG_SYNC_CONCURRENCY,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
        }
    }
}

impl ControllerConfig {
    /// Read the configuration from the environment
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `REQUEUE_SUCCESS_INTERVAL_SECS` | 30 |
    /// | `REQUEUE_BUSY_INTERVAL_SECS` | 5 |
    /// | `REQUEUE_ERROR_INTERVAL_SECS` | 2 |
    /// | `REQUEUE_WARNING_INTERVAL_SECS` | 30 |
    /// | `REMOTE_SYNC_NAMESPACE` | `kyma-system` |
    /// | `IN_KCP_MODE` | false |
    /// | `ENABLE_WEBHOOK` | false |
    /// | `CLIENT_QPS` / `CLIENT_BURST` | 300 / 600 |
    /// | `PURGE_TIMEOUT_SECS` | 300 |
    /// | `PURGE_TIMEOUT_SECS` | 300 |
    /// | `CATALOG_SYNC_CONCURRENCY` | 10 |
    /// | `MAX_CONCURRENT_RECONCILES` | 1 |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            Duration::from_secs(env_var_or_default(name, default.as_secs()))
        };
        Self {
            requeue: RequeueIntervals {
                success: secs("REQUEUE_SUCCESS_INTERVAL_SECS", defaults.requeue.success),
                busy: secs("REQUEUE_BUSY_INTERVAL_SECS", defaults.requeue.busy),
                error: secs("REQUEUE_ERROR_INTERVAL_SECS", defaults.requeue.error),
                warning: secs("REQUEUE_WARNING_INTERVAL_SECS", defaults.requeue.warning),
            },
            remote_sync_namespace: env_var_or_default(
                "REMOTE_SYNC_NAMESPACE",
                defaults.remote_sync_namespace,
            ),
            in_kcp_mode: env_var_or_default("IN_KCP_MODE", defaults.in_kcp_mode),
            webhook_enabled: env_var_or_default("ENABLE_WEBHOOK", defaults.webhook_enabled),
            flow: FlowControl {
                qps: env_var_or_default("CLIENT_QPS", defaults.flow.qps).max(1),
                burst: env_var_or_default("CLIENT_BURST", defaults.flow.burst).max(1),
            },
            purge_timeout: secs("PURGE_TIMEOUT_SECS", defaults.purge_timeout),
            catalog_sync_concurrency: env_var_or_default(
                "CATALOG_SYNC_CONCURRENCY",
                defaults.catalog_sync_concurrency,
            )
            .max(1),
            max_concurrent_reconciles: env_var_or_default(
                "MAX_CONCURRENT_RECONCILES",
                defaults.max_concurrent_reconciles,
            ),
        }
    }
}
