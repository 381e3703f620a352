//! # Reconciler
//!
//! Reconciles Kyma resources: resolves module templates into Manifests,
//! mirrors the Kyma and the module catalog into the runtime cluster and
//! drives the Kyma state machine.

mod collaborators;
mod manifests;
mod reconcile;
mod status;
mod types;

pub use collaborators::{
    DeferredRenderer, ManifestError, ManifestRenderer, WebhookError, WebhookManager,
};
pub use manifests::{build_manifest, manifest_name, needs_update};
pub use reconcile::{ensure_labels_and_finalizers, reconcile};
pub use status::{
    all_modules_ready, determine_state, failed_module_status, init_conditions,
    installed_module_status, removed_module_statuses, set_state, update_condition,
};
pub use types::{KymaReconciler, NextAction, ReconcileError};
