//! # ModuleTemplate
//!
//! One installable version of a module in one channel. The descriptor is an
//! opaque component descriptor; the controller reads only its name and version.

use crate::constants::{
    BETA_LABEL, DISABLE_LABEL_VALUE, ENABLE_LABEL_VALUE, INTERNAL_LABEL, MANDATORY_MODULE_LABEL,
    MODULE_NAME_LABEL, MODULE_VERSION_ANNOTATION, SYNC_LABEL,
};
use serde::{Deserialize, Serialize};

/// ModuleTemplate Custom Resource Definition
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ModuleTemplate",
    group = "operator.kyma-project.io",
    version = "v1beta2",
    namespaced,
    shortname = "mt",
    printcolumn = r#"{"name":"Channel", "type":"string", "jsonPath":".spec.channel"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModuleTemplateSpec {
    /// Release channel this template is published under. Must not be empty.
    #[serde(default)]
    pub channel: String,
    /// Component descriptor (`component.name`, `component.version`, layers, ...)
    #[serde(default)]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub descriptor: serde_json::Value,
    /// Default custom resource of the module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub data: Option<serde_json::Value>,
}

impl ModuleTemplate {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    fn label_enabled(&self, key: &str) -> bool {
        self.label(key)
            .is_some_and(|value| value.eq_ignore_ascii_case(ENABLE_LABEL_VALUE))
    }

    /// Value of the module-name label
    pub fn module_name(&self) -> Option<&str> {
        self.label(MODULE_NAME_LABEL)
    }

    /// Fully qualified module name taken from the descriptor's component name
    pub fn fqdn(&self) -> Option<&str> {
        self.spec
            .descriptor
            .pointer("/component/name")
            .and_then(serde_json::Value::as_str)
    }

    /// Module version from the descriptor, falling back to the version annotation
    pub fn version(&self) -> Option<&str> {
        self.spec
            .descriptor
            .pointer("/component/version")
            .and_then(serde_json::Value::as_str)
            .or_else(|| {
                self.metadata
                    .annotations
                    .as_ref()
                    .and_then(|annotations| annotations.get(MODULE_VERSION_ANNOTATION))
                    .map(String::as_str)
            })
    }

    /// Whether this template serves the module with the given identifier
    pub fn matches_module(&self, module: &str) -> bool {
        self.module_name() == Some(module) || self.name() == module || self.fqdn() == Some(module)
    }

    pub fn is_internal(&self) -> bool {
        self.label_enabled(INTERNAL_LABEL)
    }

    pub fn is_beta(&self) -> bool {
        self.label_enabled(BETA_LABEL)
    }

    pub fn is_mandatory(&self) -> bool {
        self.label_enabled(MANDATORY_MODULE_LABEL)
    }

    /// Whether the template belongs in the catalog of a tenant with the given visibility flags
    pub fn sync_enabled(&self, beta_enabled: bool, internal_enabled: bool) -> bool {
        if self
            .label(SYNC_LABEL)
            .is_some_and(|value| value.eq_ignore_ascii_case(DISABLE_LABEL_VALUE))
        {
            return false;
        }
        if self.is_beta() && !beta_enabled {
            return false;
        }
        if self.is_internal() && !internal_enabled {
            return false;
        }
        !self.is_mandatory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn template(labels: &[(&str, &str)]) -> ModuleTemplate {
        let mut template = ModuleTemplate::new(
            "keda-regular",
            ModuleTemplateSpec {
                channel: "regular".to_string(),
                descriptor: serde_json::json!({
                    "component": {"name": "kyma-project.io/module/keda", "version": "1.2.0"}
                }),
                data: None,
            },
        );
        template.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        template
    }

    #[test]
    fn test_descriptor_fields() {
        let t = template(&[]);
        assert_eq!(t.fqdn(), Some("kyma-project.io/module/keda"));
        assert_eq!(t.version(), Some("1.2.0"));
    }

    #[test]
    fn test_version_annotation_fallback() {
        let mut t = template(&[]);
        t.spec.descriptor = serde_json::json!({});
        t.metadata.annotations = Some(BTreeMap::from([(
            MODULE_VERSION_ANNOTATION.to_string(),
            "0.9.0".to_string(),
        )]));
        assert_eq!(t.version(), Some("0.9.0"));
    }

    #[test]
    fn test_matches_module_by_label_name_or_fqdn() {
        let t = template(&[(MODULE_NAME_LABEL, "keda")]);
        assert!(t.matches_module("keda"));
        assert!(t.matches_module("keda-regular"));
        assert!(t.matches_module("kyma-project.io/module/keda"));
        assert!(!t.matches_module("serverless"));
    }

    #[test]
    fn test_sync_enabled() {
        assert!(template(&[]).sync_enabled(false, false));
        assert!(!template(&[(SYNC_LABEL, "false")]).sync_enabled(true, true));
        assert!(!template(&[(BETA_LABEL, "true")]).sync_enabled(false, true));
        assert!(template(&[(BETA_LABEL, "true")]).sync_enabled(true, false));
        assert!(!template(&[(INTERNAL_LABEL, "true")]).sync_enabled(true, false));
        assert!(!template(&[(MANDATORY_MODULE_LABEL, "true")]).sync_enabled(true, true));
    }
}
