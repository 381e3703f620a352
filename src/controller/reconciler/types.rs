//! # Reconciler Types
//!
//! The reconciler context shared by all reconciles, its error type and the
//! outcome of a single reconcile.

use super::collaborators::{DeferredRenderer, ManifestError, ManifestRenderer, WebhookError, WebhookManager};
use crate::catalog::{CatalogError, RemoteCatalog};
use crate::cluster::{ClusterError, ObjectKey, SharedCluster};
use crate::config::ControllerConfig;
use crate::controller::backoff::BackoffState;
use crate::crd::Kyma;
use crate::events::EventRecorder;
use crate::remote::{RemoteClientLookup, SessionError};
use kube::runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A runtime-cluster operation was requested without an open sync session
    #[error("sync session required for kyma {0} but none is open")]
    SessionMissing(ObjectKey),

    #[error("initializing sync context failed: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("could not synchronize remote module catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("error while installing watcher webhook: {0}")]
    Webhook(#[from] WebhookError),
}

/// What the controller should do after a reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Wait for the next change event
    NoRequeue,
    RequeueImmediately,
    RequeueAfter(Duration),
}

impl NextAction {
    pub fn into_action(self) -> Action {
        match self {
            NextAction::NoRequeue => Action::await_change(),
            NextAction::RequeueImmediately => Action::requeue(Duration::ZERO),
            NextAction::RequeueAfter(after) => Action::requeue(after),
        }
    }

    /// Reason label for the requeue metric
    pub fn reason(&self) -> &'static str {
        match self {
            NextAction::NoRequeue => "none",
            NextAction::RequeueImmediately => "immediate",
            NextAction::RequeueAfter(_) => "interval",
        }
    }
}

/// Shared context of all Kyma reconciles
pub struct KymaReconciler {
    pub(crate) control_plane: SharedCluster,
    pub(crate) remote: RemoteClientLookup,
    pub(crate) config: ControllerConfig,
    pub(crate) events: Arc<dyn EventRecorder>,
    pub(crate) catalog: RemoteCatalog,
    pub(crate) renderer: Arc<dyn ManifestRenderer>,
    pub(crate) webhook: Option<Arc<dyn WebhookManager>>,
    /// Per-resource error backoff, keyed by `namespace/name`
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for KymaReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KymaReconciler")
            .field("control_plane", &self.control_plane.identity())
            .field("config", &self.config)
            .field("webhook", &self.webhook.is_some())
            .finish_non_exhaustive()
    }
}

impl KymaReconciler {
    pub fn new(
        control_plane: SharedCluster,
        remote: RemoteClientLookup,
        config: ControllerConfig,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        let catalog = RemoteCatalog::new(config.catalog_sync_concurrency);
        Self {
            control_plane,
            remote,
            config,
            events,
            catalog,
            renderer: Arc::new(DeferredRenderer),
            webhook: None,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn ManifestRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    #[must_use]
    pub fn with_webhook_manager(mut self, webhook: Arc<dyn WebhookManager>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn remote(&self) -> &RemoteClientLookup {
        &self.remote
    }

    /// Whether `kyma` is mirrored into its runtime cluster
    pub fn sync_enabled(&self, kyma: &Kyma) -> bool {
        self.config.in_kcp_mode && kyma.sync_enabled()
    }

    pub fn webhook_enabled(&self, kyma: &Kyma) -> bool {
        self.config.webhook_enabled && self.sync_enabled(kyma) && self.webhook.is_some()
    }

    /// Namespace in the runtime cluster holding the tenant's objects
    pub fn sync_namespace<'a>(&'a self, kyma: &'a Kyma) -> &'a str {
        if kyma.spec.sync.namespace.is_empty() {
            &self.config.remote_sync_namespace
        } else {
            &kyma.spec.sync.namespace
        }
    }
}
