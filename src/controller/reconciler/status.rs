//! # Status Management
//!
//! Conditions, module tracking records and the aggregate state of a Kyma.

use crate::crd::{
    Condition, ConditionType, Kyma, KymaStatus, LastOperation, Manifest, ModuleStatus,
    ModuleTemplate, State, TrackingObject, CONDITION_FALSE, CONDITION_REASON_READY,
    CONDITION_TRUE, CONDITION_UNKNOWN,
};
use crate::templates::{ResolvedModule, TemplateError};

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Make the condition set match the enabled features
///
/// `Modules` is always tracked, `ModuleCatalog` only with sync and `SKRWebhook`
/// only with the webhook. Missing conditions start as `Unknown`.
pub fn init_conditions(kyma: &mut Kyma, sync_enabled: bool, webhook_enabled: bool) {
    let generation = kyma.metadata.generation;
    let mut wanted = vec![ConditionType::Modules];
    if sync_enabled {
        wanted.push(ConditionType::ModuleCatalog);
    }
    if webhook_enabled {
        wanted.push(ConditionType::SkrWebhook);
    }

    let status = kyma.status_mut();
    status
        .conditions
        .retain(|c| wanted.iter().any(|t| t.as_str() == c.r#type));
    for condition_type in wanted {
        if status.condition(condition_type.as_str()).is_none() {
            status.conditions.push(Condition {
                r#type: condition_type.as_str().to_string(),
                status: CONDITION_UNKNOWN.to_string(),
                observed_generation: generation,
                last_transition_time: Some(now()),
                reason: Some(CONDITION_REASON_READY.to_string()),
                message: None,
            });
        }
    }
}

pub fn update_condition(kyma: &mut Kyma, condition_type: ConditionType, ready: bool) {
    let generation = kyma.metadata.generation;
    let status_value = if ready { CONDITION_TRUE } else { CONDITION_FALSE };
    let status = kyma.status_mut();
    let index = match status
        .conditions
        .iter()
        .position(|c| c.r#type == condition_type.as_str())
    {
        Some(index) => index,
        None => {
            status.conditions.push(Condition {
                r#type: condition_type.as_str().to_string(),
                status: CONDITION_UNKNOWN.to_string(),
                observed_generation: None,
                last_transition_time: None,
                reason: None,
                message: None,
            });
            status.conditions.len() - 1
        }
    };
    let condition = &mut status.conditions[index];
    if condition.status != status_value {
        condition.last_transition_time = Some(now());
    }
    condition.status = status_value.to_string();
    condition.reason = Some(CONDITION_REASON_READY.to_string());
    condition.message = Some(condition_type.message(ready).to_string());
    condition.observed_generation = generation;
}

/// Aggregate state: module Error > Warning > Processing, then any condition not
/// `True` means Processing, else Ready
pub fn determine_state(status: &KymaStatus) -> State {
    let has = |state: State| status.modules.iter().any(|m| m.state == state);
    if has(State::Error) {
        return State::Error;
    }
    if has(State::Warning) {
        return State::Warning;
    }
    if has(State::Processing) {
        return State::Processing;
    }
    if status.conditions.iter().any(|c| !c.is_true()) {
        return State::Processing;
    }
    State::Ready
}

pub fn all_modules_ready(kyma: &Kyma) -> bool {
    kyma.status
        .as_ref()
        .is_none_or(|status| status.modules.iter().all(|m| m.state == State::Ready))
}

/// Record state, operation message and active channel
pub fn set_state(kyma: &mut Kyma, state: State, message: &str) {
    let channel = kyma.spec.channel.clone();
    let status = kyma.status_mut();
    status.state = state;
    status.active_channel = (!channel.is_empty()).then_some(channel);
    status.last_operation = Some(LastOperation {
        operation: message.to_string(),
        last_update_time: now(),
    });
}

fn tracking(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> TrackingObject {
    TrackingObject {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        generation: meta.generation,
    }
}

/// Status of a module whose template resolved and whose manifest exists
pub fn installed_module_status(
    module: &str,
    template: &ModuleTemplate,
    manifest: &Manifest,
) -> ModuleStatus {
    let state = match manifest.state() {
        // not yet picked up by the declarative engine
        State::Unset => State::Processing,
        state => state,
    };
    ModuleStatus {
        name: module.to_string(),
        fqdn: template.fqdn().unwrap_or_default().to_string(),
        template: Some(tracking(&template.metadata)),
        manifest: Some(tracking(&manifest.metadata)),
        channel: template.spec.channel.clone(),
        version: manifest.spec.version.clone(),
        state,
        message: manifest.status.as_ref().and_then(|s| s.message.clone()),
    }
}

/// Status of a module whose template could not be used
///
/// A refused update keeps the previous record and only flags it; a missing
/// template is a warning; everything else is an error.
pub fn failed_module_status(
    resolved: &ResolvedModule,
    error: &TemplateError,
    previous: Option<&ModuleStatus>,
) -> ModuleStatus {
    if error.is_update_not_allowed() {
        let mut status = previous.cloned().unwrap_or_else(|| ModuleStatus {
            name: resolved.module.name.clone(),
            ..ModuleStatus::default()
        });
        status.state = State::Warning;
        status.message = Some(error.to_string());
        return status;
    }
    ModuleStatus {
        name: resolved.module.name.clone(),
        channel: resolved.desired_channel.clone(),
        state: if error.is_warning() {
            State::Warning
        } else {
            State::Error
        },
        message: Some(error.to_string()),
        ..ModuleStatus::default()
    }
}

/// Status records of modules no longer in the spec
pub fn removed_module_statuses(kyma: &Kyma) -> Vec<ModuleStatus> {
    kyma.status
        .as_ref()
        .map(|status| {
            status
                .modules
                .iter()
                .filter(|m| !kyma.spec.modules.iter().any(|module| module.name == m.name))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{KymaSpec, Module};

    fn kyma_with_modules(states: &[State]) -> Kyma {
        let mut kyma = Kyma::new("tenant", KymaSpec::default());
        kyma.status_mut().modules = states
            .iter()
            .enumerate()
            .map(|(i, state)| ModuleStatus {
                name: format!("module-{i}"),
                state: *state,
                ..Default::default()
            })
            .collect();
        kyma
    }

    #[test]
    fn test_init_conditions_follow_features() {
        let mut kyma = Kyma::new("tenant", KymaSpec::default());
        init_conditions(&mut kyma, true, false);
        let types: Vec<_> = kyma
            .status
            .as_ref()
            .unwrap()
            .conditions
            .iter()
            .map(|c| c.r#type.clone())
            .collect();
        assert_eq!(types, vec!["Modules", "ModuleCatalog"]);

        init_conditions(&mut kyma, false, false);
        assert_eq!(kyma.status.as_ref().unwrap().conditions.len(), 1);
    }

    #[test]
    fn test_determine_state_precedence() {
        let mut kyma = kyma_with_modules(&[State::Ready, State::Warning, State::Error]);
        assert_eq!(determine_state(kyma.status.as_ref().unwrap()), State::Error);

        kyma = kyma_with_modules(&[State::Processing, State::Warning]);
        assert_eq!(determine_state(kyma.status.as_ref().unwrap()), State::Warning);

        kyma = kyma_with_modules(&[State::Ready, State::Processing]);
        assert_eq!(determine_state(kyma.status.as_ref().unwrap()), State::Processing);
    }

    #[test]
    fn test_determine_state_waits_for_conditions() {
        let mut kyma = kyma_with_modules(&[State::Ready]);
        init_conditions(&mut kyma, false, false);
        assert_eq!(determine_state(kyma.status.as_ref().unwrap()), State::Processing);

        update_condition(&mut kyma, ConditionType::Modules, true);
        assert_eq!(determine_state(kyma.status.as_ref().unwrap()), State::Ready);
    }

    #[test]
    fn test_update_not_allowed_keeps_previous_record() {
        let previous = ModuleStatus {
            name: "keda".to_string(),
            channel: "regular".to_string(),
            version: "2.0.0".to_string(),
            state: State::Ready,
            ..Default::default()
        };
        let resolved = ResolvedModule {
            module: Module {
                name: "keda".to_string(),
                ..Default::default()
            },
            desired_channel: "fast".to_string(),
            result: Err(TemplateError::UpdateNotAllowed {
                message: "ignore channel skew".to_string(),
            }),
        };
        let Err(error) = &resolved.result else {
            unreachable!()
        };
        let status = failed_module_status(&resolved, error, Some(&previous));
        assert_eq!(status.state, State::Warning);
        assert_eq!(status.version, "2.0.0");
        assert_eq!(status.channel, "regular");
    }

    #[test]
    fn test_removed_module_statuses() {
        let mut kyma = kyma_with_modules(&[State::Ready, State::Ready]);
        kyma.spec.modules = vec![Module {
            name: "module-0".to_string(),
            ..Default::default()
        }];
        let removed = removed_module_statuses(&kyma);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "module-1");
    }
}
