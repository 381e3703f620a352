//! # Kubernetes Events
//!
//! Trait-based abstraction over `kube::runtime::events::Recorder` so the
//! reconciler can emit Events visible via `kubectl describe kyma`.
//!
//! Events are fire-and-forget: failures are logged and never propagate.

use crate::crd::Kyma;
use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

impl From<EventSeverity> for EventType {
    fn from(severity: EventSeverity) -> Self {
        match severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        }
    }
}

#[async_trait]
pub trait EventRecorder: Send + Sync + std::fmt::Debug {
    async fn publish(&self, kyma: &Kyma, severity: EventSeverity, reason: &str, message: String);
}

/// Production implementation wrapping `kube::runtime::events::Recorder`
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventRecorder").finish_non_exhaustive()
    }
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(&self, kyma: &Kyma, severity: EventSeverity, reason: &str, message: String) {
        let event = Event {
            type_: severity.into(),
            reason: reason.to_string(),
            note: Some(message),
            action: actions::RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &kyma.object_ref(&())).await {
            warn!(
                reason,
                kyma = kyma.name(),
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// An event kept by [`EventLog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
}

/// In-memory recorder for single-process setups and tests
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<RecordedEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.events().iter().any(|e| e.reason == reason)
    }
}

#[async_trait]
impl EventRecorder for EventLog {
    async fn publish(&self, kyma: &Kyma, severity: EventSeverity, reason: &str, message: String) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                object: format!("{}/{}", kyma.namespace(), kyma.name()),
                severity,
                reason: reason.to_string(),
                message,
            });
    }
}

/// Well-known event reasons
pub mod reasons {
    pub const CRD_INSTALLATION: &str = "CRDInstallation";
    pub const CRDS_MISSING: &str = "CRDsMissing";
    pub const SYNC_CONTEXT_ERROR: &str = "SyncContextError";
    pub const REMOTE_KYMA_ERROR: &str = "RemoteKymaError";
    pub const PROCESSING_ERROR: &str = "ProcessingError";
    pub const MODULE_RECONCILIATION_ERROR: &str = "ModuleReconciliationError";
    pub const STATE_CHANGED: &str = "StateChanged";
    pub const DELETION: &str = "Deletion";
    pub const WEBHOOK_REMOVAL_FAILED: &str = "WebhookRemovalFailed";
    pub const ACCESS_SECRET_NOT_FOUND: &str = "AccessSecretNotFound";
    pub const MANIFESTS_PURGED: &str = "ManifestsPurged";
}

/// Well-known event actions
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
}
