//! # Custom Resource Definitions
//!
//! CRD types for the lifecycle manager.
//!
//! - [`Kyma`] is the per-tenant desired state held in the control plane (KCP)
//!   and mirrored into the tenant's runtime cluster (SKR).
//! - [`ModuleTemplate`] describes one installable version of a module in one channel.
//! - [`Manifest`] is the child resource the controller creates per module.

mod kyma;
mod manifest;
mod module_template;
mod status;

pub use kyma::*;
pub use manifest::*;
pub use module_template::*;
pub use status::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;
use schemars::{Schema, SchemaGenerator};

/// All CRDs owned by the operator, in installation order
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![Kyma::crd(), ModuleTemplate::crd(), Manifest::crd()]
}

/// Name of the CRD serving the given plural, e.g. `moduletemplates.operator.kyma-project.io`
pub fn crd_name(plural: &str) -> String {
    format!("{plural}.{}", crate::constants::CRD_NAME_SUFFIX)
}

/// Structural schema for opaque payloads that the controller passes through untouched
pub(crate) fn preserve_unknown_fields(_gen: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crd_names_match_generated_crds() {
        let names: Vec<String> = crds()
            .into_iter()
            .filter_map(|crd| crd.metadata.name)
            .collect();
        assert_eq!(
            names,
            vec![
                crd_name("kymas"),
                crd_name("moduletemplates"),
                crd_name("manifests")
            ]
        );
    }
}
