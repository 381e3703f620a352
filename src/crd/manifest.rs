//! # Manifest
//!
//! Child resource created per module. Rendering and applying its payload is the
//! job of the declarative engine; the controller only creates, reads and deletes it.

use crate::crd::status::State;
use serde::{Deserialize, Serialize};

/// Manifest Custom Resource Definition
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Manifest",
    group = "operator.kyma-project.io",
    version = "v1beta2",
    namespaced,
    status = "ManifestStatus",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSpec {
    /// Module version the manifest installs
    #[serde(default)]
    pub version: String,
    /// Channel the template was resolved from
    #[serde(default)]
    pub channel: String,
    /// Install the payload into the runtime cluster rather than the control plane
    #[serde(default)]
    pub remote: bool,
    /// Component descriptor copied from the resolved template
    #[serde(default)]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub install: serde_json::Value,
    /// Default custom resource of the module, if the module owns it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub resource: Option<serde_json::Value>,
}

/// Status written by the declarative engine
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStatus {
    #[serde(default)]
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Manifest {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn state(&self) -> State {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }
}
