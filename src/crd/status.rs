//! # Status Types
//!
//! State, condition, and per-module tracking records shared by the Kyma and
//! Manifest resources.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a Kyma, a module, or a Manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum State {
    /// Freshly created, not yet picked up by the controller
    #[default]
    #[serde(rename = "")]
    Unset,
    Processing,
    Ready,
    Warning,
    Error,
    Deleting,
    /// Module is installed but no longer managed by the lifecycle manager
    Unmanaged,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Unset => "",
            State::Processing => "Processing",
            State::Ready => "Ready",
            State::Warning => "Warning",
            State::Error => "Error",
            State::Deleting => "Deleting",
            State::Unmanaged => "Unmanaged",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition types maintained on the Kyma status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionType {
    /// All modules are in a ready state
    Modules,
    /// The module catalog is synchronized to the remote cluster
    ModuleCatalog,
    /// The runtime watcher webhook is installed on the remote cluster
    SkrWebhook,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Modules => "Modules",
            ConditionType::ModuleCatalog => "ModuleCatalog",
            ConditionType::SkrWebhook => "SKRWebhook",
        }
    }

    /// Message recorded when the condition is (or is not) satisfied
    pub fn message(&self, ready: bool) -> &'static str {
        match (self, ready) {
            (ConditionType::Modules, true) => "all modules are in ready state",
            (ConditionType::Modules, false) => "not all modules are in ready state",
            (ConditionType::ModuleCatalog, true) => "module templates are synchronized",
            (ConditionType::ModuleCatalog, false) => "module templates synchronization failed",
            (ConditionType::SkrWebhook, true) => "skrwebhook is synchronized",
            (ConditionType::SkrWebhook, false) => "skrwebhook synchronization failed",
        }
    }
}

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";
pub const CONDITION_REASON_READY: &str = "Ready";

/// Condition for status
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == CONDITION_TRUE
    }
}

/// Reference to an object the status keeps track of, with the generation observed last
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackingObject {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

/// Per-module tracking record on the Kyma status
///
/// Doubles as the anchor for channel and generation skew detection.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    pub name: String,
    #[serde(default)]
    pub fqdn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TrackingObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<TrackingObject>,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Last operation performed by the controller, for humans reading the status
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    pub operation: String,
    pub last_update_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_state_serializes_to_empty_string() {
        assert_eq!(serde_json::to_string(&State::Unset).unwrap(), "\"\"");
        let state: State = serde_json::from_str("\"Warning\"").unwrap();
        assert_eq!(state, State::Warning);
    }

    #[test]
    fn test_condition_type_names() {
        assert_eq!(ConditionType::SkrWebhook.as_str(), "SKRWebhook");
        assert_eq!(ConditionType::ModuleCatalog.as_str(), "ModuleCatalog");
    }
}
