use crate::cluster::ClusterError;
use crate::remote::SessionError;
use thiserror::Error;

/// Catalog phase a per-item failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogPhase {
    Apply,
    Delete,
}

impl std::fmt::Display for CatalogPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogPhase::Apply => f.write_str("could not apply catalog templates"),
            CatalogPhase::Delete => f.write_str("failed to delete obsolete catalog templates"),
        }
    }
}

/// A single failed template operation
#[derive(Debug, Error)]
#[error("{phase}: {template}: {source}")]
pub struct CatalogItemError {
    pub phase: CatalogPhase,
    pub template: String,
    #[source]
    pub source: ClusterError,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Some operations failed; the others completed
    #[error("{} catalog operation(s) failed: {}", .0.len(), join(.0))]
    Aggregate(Vec<CatalogItemError>),

    #[error("failed to bootstrap ModuleTemplate CRD in runtime cluster: {0}")]
    CrdBootstrap(#[source] SessionError),

    #[error("failed to list module templates from runtime cluster: {0}")]
    List(#[source] ClusterError),
}

impl CatalogError {
    /// Per-item failures, empty for non-aggregate errors
    pub fn items(&self) -> &[CatalogItemError] {
        match self {
            CatalogError::Aggregate(items) => items,
            _ => &[],
        }
    }
}

fn join(items: &[CatalogItemError]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
