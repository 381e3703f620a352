//! # Sync Metrics
//!
//! Runtime-cluster client cache size, catalog sync and CRD upgrade counters.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{IntCounter, IntGauge};
use std::sync::LazyLock;

static REMOTE_CLIENTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "lifecycle_manager_remote_clients",
        "Number of runtime cluster clients currently cached",
    )
    .expect("Failed to create REMOTE_CLIENTS metric - this should never happen")
});

static CATALOG_TEMPLATES_APPLIED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lifecycle_manager_catalog_templates_applied_total",
        "Total number of module templates applied to runtime clusters",
    )
    .expect("Failed to create CATALOG_TEMPLATES_APPLIED_TOTAL metric - this should never happen")
});

static CATALOG_TEMPLATES_DELETED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lifecycle_manager_catalog_templates_deleted_total",
        "Total number of module templates deleted from runtime clusters",
    )
    .expect("Failed to create CATALOG_TEMPLATES_DELETED_TOTAL metric - this should never happen")
});

static CATALOG_SYNC_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lifecycle_manager_catalog_sync_errors_total",
        "Total number of catalog synchronizations with at least one failed item",
    )
    .expect("Failed to create CATALOG_SYNC_ERRORS_TOTAL metric - this should never happen")
});

static CRD_UPDATES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "lifecycle_manager_crd_updates_total",
        "Total number of CRD upgrades applied to runtime clusters",
    )
    .expect("Failed to create CRD_UPDATES_TOTAL metric - this should never happen")
});

/// Register sync metrics with the registry
pub(crate) fn register_sync_metrics() -> Result<()> {
    REGISTRY.register(Box::new(REMOTE_CLIENTS.clone()))?;
    REGISTRY.register(Box::new(CATALOG_TEMPLATES_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CATALOG_TEMPLATES_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CATALOG_SYNC_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CRD_UPDATES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_remote_clients() {
    REMOTE_CLIENTS.inc();
}

pub fn decrement_remote_clients() {
    REMOTE_CLIENTS.dec();
}

pub fn increment_catalog_templates_applied() {
    CATALOG_TEMPLATES_APPLIED_TOTAL.inc();
}

pub fn increment_catalog_templates_deleted() {
    CATALOG_TEMPLATES_DELETED_TOTAL.inc();
}

pub fn increment_catalog_sync_errors() {
    CATALOG_SYNC_ERRORS_TOTAL.inc();
}

pub fn increment_crd_updates() {
    CRD_UPDATES_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_catalog_templates_applied() {
        let before = CATALOG_TEMPLATES_APPLIED_TOTAL.get();
        increment_catalog_templates_applied();
        let after = CATALOG_TEMPLATES_APPLIED_TOTAL.get();
        assert!(after > before);
    }

    #[test]
    fn test_increment_crd_updates() {
        let before = CRD_UPDATES_TOTAL.get();
        increment_crd_updates();
        let after = CRD_UPDATES_TOTAL.get();
        assert!(after > before);
    }
}
