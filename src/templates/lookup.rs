//! # Template Lookup
//!
//! Picks exactly one [`ModuleTemplate`] per requested module.
//!
//! ## Resolution
//!
//! 1. Desired channel: module override, else the Kyma's channel, else `regular`
//! 2. Candidates: templates matching the module (module-name label, template name
//!    or component name) published in the desired channel
//! 3. Exactly one candidate is required, and it must carry a channel
//! 4. Internal and beta templates are only visible to internal and beta Kymas
//! 5. Skew against the module's tracked status:
//!    - channel skew is accepted only when the version does not go down
//!    - generation skew is always accepted
//!
//! Templates whose skew is accepted are marked outdated so the caller re-renders them.

use super::error::TemplateError;
use crate::crd::{Kyma, Module, ModuleStatus, ModuleTemplate};
use semver::Version;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info};

/// Template chosen for a module
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTemplate {
    pub template: ModuleTemplate,
    /// Differs from what the module status tracks
    pub outdated: bool,
}

/// Outcome of resolving one module
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModule {
    pub module: Module,
    pub desired_channel: String,
    pub result: Result<ResolvedTemplate, TemplateError>,
}

impl ResolvedModule {
    pub fn template(&self) -> Option<&ModuleTemplate> {
        self.result.as_ref().ok().map(|resolved| &resolved.template)
    }
}

/// Channel the module should be installed from
pub fn desired_channel(module: &Module, kyma: &Kyma) -> String {
    match module.channel.as_deref() {
        Some(channel) if !channel.is_empty() => channel.to_string(),
        _ => kyma.default_channel().to_string(),
    }
}

/// Resolve every module of `kyma`, in spec order
///
/// Modules with `remote_module_template_ref` are looked up in `remote_templates`,
/// all others in `kcp_templates`. A module listed twice is resolved once.
pub fn resolve_modules(
    kyma: &Kyma,
    kcp_templates: &[ModuleTemplate],
    remote_templates: &[ModuleTemplate],
) -> Vec<ResolvedModule> {
    let mut seen = HashSet::new();
    kyma.spec
        .modules
        .iter()
        .filter(|module| seen.insert(module.name.as_str()))
        .map(|module| {
            let templates = if module.remote_module_template_ref {
                remote_templates
            } else {
                kcp_templates
            };
            resolve_module(kyma, module, templates)
        })
        .collect()
}

/// Resolve a single module against the given templates
pub fn resolve_module(kyma: &Kyma, module: &Module, templates: &[ModuleTemplate]) -> ResolvedModule {
    let channel = desired_channel(module, kyma);
    let result = find_template(&module.name, &channel, templates).and_then(|template| {
        check_visibility(template, kyma)?;
        let outdated = match kyma.module_status(&module.name) {
            Some(status) => check_skew(template, &channel, status)?,
            None => false,
        };
        Ok(ResolvedTemplate {
            template: template.clone(),
            outdated,
        })
    });

    ResolvedModule {
        module: module.clone(),
        desired_channel: channel,
        result,
    }
}

fn find_template<'a>(
    module: &str,
    channel: &str,
    templates: &'a [ModuleTemplate],
) -> Result<&'a ModuleTemplate, TemplateError> {
    let candidates: Vec<&ModuleTemplate> = templates
        .iter()
        .filter(|template| template.matches_module(module) && template.spec.channel == channel)
        .collect();

    match candidates.as_slice() {
        [] => Err(TemplateError::NoTemplateInChannel {
            module: module.to_string(),
            channel: channel.to_string(),
        }),
        [template] if template.spec.channel.is_empty() => Err(TemplateError::EmptyChannel {
            module: module.to_string(),
            template: template.name().to_string(),
        }),
        [template] => {
            debug!(module, channel, template = template.name(), "using template");
            Ok(template)
        }
        many => {
            let mut names: Vec<String> = many
                .iter()
                .map(|t| format!("{}/{}", t.namespace(), t.name()))
                .collect();
            names.sort();
            Err(TemplateError::Ambiguous {
                module: module.to_string(),
                candidates: names,
            })
        }
    }
}

fn check_visibility(template: &ModuleTemplate, kyma: &Kyma) -> Result<(), TemplateError> {
    if template.is_internal() && !kyma.is_internal() {
        return Err(TemplateError::NotAllowed {
            template: template.name().to_string(),
            reason: "internal module",
        });
    }
    if template.is_beta() && !kyma.is_beta() {
        return Err(TemplateError::NotAllowed {
            template: template.name().to_string(),
            reason: "beta module",
        });
    }
    Ok(())
}

/// Returns whether the template is outdated relative to `status`
fn check_skew(template: &ModuleTemplate, channel: &str, status: &ModuleStatus) -> Result<bool, TemplateError> {
    let Some(tracked) = &status.template else {
        return Ok(false);
    };

    if status.channel != channel {
        info!(
            module = %status.fqdn,
            template = template.name(),
            previous_channel = %status.channel,
            new_channel = channel,
            "outdated ModuleTemplate: channel skew"
        );
        let new_version = template
            .version()
            .ok_or_else(|| update_not_allowed("descriptor from template contains no version"))
            .and_then(|raw| {
                parse_version(raw)
                    .map_err(|_| update_not_allowed("descriptor from template contains invalid version"))
            })?;
        let previous_version = parse_version(&status.version)
            .map_err(|_| update_not_allowed("module status contains invalid version"))?;

        if new_version.cmp_precedence(&previous_version) == Ordering::Less {
            return Err(TemplateError::UpdateNotAllowed {
                message: format!(
                    "ignore channel skew (from {} to {channel}), as a higher version ({previous_version}) of the module was previously installed",
                    status.channel
                ),
            });
        }
        return Ok(true);
    }

    if tracked.generation != template.metadata.generation {
        info!(
            module = %status.fqdn,
            template = template.name(),
            previous_generation = ?tracked.generation,
            new_generation = ?template.metadata.generation,
            "outdated ModuleTemplate: generation skew"
        );
        return Ok(true);
    }

    Ok(false)
}

fn update_not_allowed(reason: &str) -> TemplateError {
    TemplateError::UpdateNotAllowed {
        message: format!("could not handle channel skew as {reason}"),
    }
}

/// Parse a module version, tolerating a leading `v` and missing minor/patch parts
pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }

    // "1" or "1.2", optionally followed by pre-release or build metadata
    let split = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, rest) = trimmed.split_at(split);
    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{rest}"),
        2 => format!("{core}.0{rest}"),
        _ => trimmed.to_string(),
    };
    Version::parse(&padded)
}
