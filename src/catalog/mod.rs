//! # Catalog
//!
//! Synchronization of module templates from the control plane into the
//! tenant's runtime cluster.

mod error;
mod remote_catalog;

pub use error::{CatalogError, CatalogItemError, CatalogPhase};
pub use remote_catalog::{RemoteCatalog, RemoteTemplate};

use crate::crd::{Kyma, ModuleTemplate};

/// Templates that belong in the runtime catalog of `kyma`
pub fn catalog_templates(kyma: &Kyma, templates: &[ModuleTemplate]) -> Vec<ModuleTemplate> {
    templates
        .iter()
        .filter(|template| template.sync_enabled(kyma.is_beta(), kyma.is_internal()))
        .cloned()
        .collect()
}
