//! # Kyma
//!
//! The root aggregate per tenant. The control-plane copy is reconciled by the
//! controller; a copy in the tenant's runtime cluster is kept in sync with it.

use crate::constants::{
    BETA_LABEL, DEFAULT_CHANNEL, ENABLE_LABEL_VALUE, INTERNAL_LABEL, KYMA_FINALIZER,
    SKIP_RECONCILIATION_LABEL, SYNC_STRATEGY_ANNOTATION,
};
use crate::crd::status::{Condition, LastOperation, ModuleStatus, State};
use serde::{Deserialize, Serialize};

/// Kyma Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: operator.kyma-project.io/v1beta2
/// kind: Kyma
/// metadata:
///   name: tenant-a
///   namespace: kcp-system
/// spec:
///   channel: regular
///   modules:
///     - name: serverless
///     - name: keda
///       channel: fast
///   sync:
///     enabled: true
///     namespace: kyma-system
///     strategy: local-secret
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Kyma",
    group = "operator.kyma-project.io",
    version = "v1beta2",
    namespaced,
    status = "KymaStatus",
    shortname = "kyma",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Channel", "type":"string", "jsonPath":".spec.channel"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KymaSpec {
    /// Default release channel for all modules that do not override it
    #[serde(default)]
    pub channel: String,
    /// Modules to install, in declaration order
    #[serde(default)]
    pub modules: Vec<Module>,
    /// Synchronization with the tenant's runtime cluster
    #[serde(default)]
    pub sync: SyncConfig,
}

/// A module requested by the tenant
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Module identifier: the module-name label value, the template name, or the component name
    pub name: String,
    /// Channel override for this module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Controller responsible for the module, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_name: Option<String>,
    /// Look up the template in the runtime cluster instead of the control plane
    #[serde(default)]
    pub remote_module_template_ref: bool,
    /// Whether the module's default custom resource is created and deleted with the module
    #[serde(default)]
    pub custom_resource_policy: CustomResourcePolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum CustomResourcePolicy {
    #[default]
    CreateAndDelete,
    Ignore,
}

/// Synchronization settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Namespace in the runtime cluster; falls back to the controller default when empty
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub strategy: SyncStrategy,
}

/// How the controller obtains a client for the runtime cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStrategy {
    /// Kubeconfig read from a labelled secret in the control plane
    #[default]
    LocalSecret,
    /// Injected client, for co-located or single-cluster deployments
    LocalClient,
}

impl std::str::FromStr for SyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-secret" => Ok(SyncStrategy::LocalSecret),
            "local-client" => Ok(SyncStrategy::LocalClient),
            other => Err(format!("unknown sync strategy: {other}")),
        }
    }
}

/// Status of the Kyma resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KymaStatus {
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// One entry per spec module once reconciled; trailing extras only during cleanup
    #[serde(default)]
    pub modules: Vec<ModuleStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
}

impl Kyma {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn state(&self) -> State {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    fn label_enabled(&self, label: &str) -> bool {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(label))
            .is_some_and(|value| value.eq_ignore_ascii_case(ENABLE_LABEL_VALUE))
    }

    pub fn is_internal(&self) -> bool {
        self.label_enabled(INTERNAL_LABEL)
    }

    pub fn is_beta(&self) -> bool {
        self.label_enabled(BETA_LABEL)
    }

    pub fn skip_reconciliation(&self) -> bool {
        self.label_enabled(SKIP_RECONCILIATION_LABEL)
    }

    pub fn sync_enabled(&self) -> bool {
        self.spec.sync.enabled
    }

    /// Strategy from the `sync-strategy` annotation, else from the spec
    pub fn sync_strategy(&self) -> SyncStrategy {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(SYNC_STRATEGY_ANNOTATION))
            .and_then(|value| value.parse().ok())
            .unwrap_or(self.spec.sync.strategy)
    }

    /// Channel modules fall back to when they carry no override
    pub fn default_channel(&self) -> &str {
        if self.spec.channel.is_empty() {
            DEFAULT_CHANNEL
        } else {
            &self.spec.channel
        }
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
    }

    pub fn has_kyma_finalizer(&self) -> bool {
        self.has_finalizer(KYMA_FINALIZER)
    }

    pub fn module_status(&self, module: &str) -> Option<&ModuleStatus> {
        self.status
            .as_ref()
            .and_then(|status| status.modules.iter().find(|m| m.name == module))
    }

    /// Status sub-object, created on first access
    pub fn status_mut(&mut self) -> &mut KymaStatus {
        self.status.get_or_insert_with(KymaStatus::default)
    }
}

impl KymaStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }
}
