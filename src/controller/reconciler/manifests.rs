//! # Manifest Reconciliation
//!
//! Every module of a Kyma is backed by one Manifest in the Kyma's namespace,
//! named `<kyma>-<module>` and labelled with the Kyma name. Manifests are
//! server-side applied when the resolved template moved away from what the
//! module status tracks, handed to the renderer, and deleted once the module
//! leaves the spec or its template is no longer visible to the tenant.

use super::status;
use super::types::{KymaReconciler, ReconcileError};
use crate::cluster::{ignore_not_found, ClusterClientExt, ListOptions, ObjectKey};
use crate::constants::{KYMA_NAME_LABEL, MANAGED_BY_LABEL, MODULE_NAME_LABEL, OPERATOR_NAME};
use crate::crd::{
    CustomResourcePolicy, Kyma, Manifest, ManifestSpec, ModuleStatus, ModuleTemplate, State,
};
use crate::events::{reasons, EventSeverity};
use crate::remote::SyncSession;
use crate::templates::{resolve_modules, ResolvedModule, TemplateError};
use futures::future::join_all;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource as _;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub fn manifest_name(kyma: &Kyma, module: &str) -> String {
    format!("{}-{}", kyma.name(), module).to_lowercase()
}

fn owner_reference(kyma: &Kyma) -> OwnerReference {
    OwnerReference {
        api_version: Kyma::api_version(&()).to_string(),
        kind: Kyma::kind(&()).to_string(),
        name: kyma.name().to_string(),
        uid: kyma.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Fill in name and namespace of the module's default resource when the template leaves them empty
fn default_resource(mut data: Value, name: &str, namespace: &str) -> Value {
    let Some(object) = data.as_object_mut() else {
        return data;
    };
    let metadata = object
        .entry("metadata")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Some(metadata) = metadata.as_object_mut() {
        let is_empty = |value: Option<&Value>| value.and_then(Value::as_str).is_none_or(str::is_empty);
        if is_empty(metadata.get("name")) {
            metadata.insert("name".to_string(), Value::from(name));
        }
        if is_empty(metadata.get("namespace")) {
            metadata.insert("namespace".to_string(), Value::from(namespace));
        }
    }
    data
}

/// Desired Manifest for a module resolved to `template`
pub fn build_manifest(
    kyma: &Kyma,
    resolved: &ResolvedModule,
    template: &ModuleTemplate,
    remote: bool,
    sync_namespace: &str,
) -> Manifest {
    let name = manifest_name(kyma, &resolved.module.name);
    let resource = match resolved.module.custom_resource_policy {
        CustomResourcePolicy::CreateAndDelete => template
            .spec
            .data
            .clone()
            .map(|data| default_resource(data, &name, sync_namespace)),
        CustomResourcePolicy::Ignore => None,
    };
    let mut manifest = Manifest::new(
        &name,
        ManifestSpec {
            version: template.version().unwrap_or_default().to_string(),
            channel: template.spec.channel.clone(),
            remote,
            install: template.spec.descriptor.clone(),
            resource,
        },
    );
    manifest.metadata.namespace = Some(kyma.namespace().to_string());
    manifest.metadata.labels = Some(BTreeMap::from([
        (KYMA_NAME_LABEL.to_string(), kyma.name().to_string()),
        (MODULE_NAME_LABEL.to_string(), resolved.module.name.clone()),
        (MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string()),
    ]));
    manifest.metadata.owner_references = Some(vec![owner_reference(kyma)]);
    manifest
}

/// Whether the live manifest lags behind the tracked module status or the template
pub fn needs_update(
    existing: &Manifest,
    desired: &Manifest,
    previous: Option<&ModuleStatus>,
    template: &ModuleTemplate,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    let tracked_generation = previous.template.as_ref().and_then(|t| t.generation);
    if tracked_generation.is_some() && tracked_generation != template.metadata.generation {
        return true;
    }
    let live_state = match existing.state() {
        State::Unset => State::Processing,
        state => state,
    };
    desired.spec.version != previous.version
        || desired.spec.channel != previous.channel
        || live_state != previous.state
}

impl KymaReconciler {
    /// Resolve, apply and track the Manifests of all modules of `kyma`
    ///
    /// Returns the new module status list: one record per spec module, in spec
    /// order, followed by records of removed modules still being cleaned up.
    pub(crate) async fn reconcile_manifests(
        &self,
        kyma: &Kyma,
        session: Option<&SyncSession>,
    ) -> Result<Vec<ModuleStatus>, ReconcileError> {
        let kcp_templates = self
            .control_plane
            .list_as::<ModuleTemplate>(&ListOptions::default())
            .await?;
        let remote_templates = if kyma.spec.modules.iter().any(|m| m.remote_module_template_ref) {
            let session =
                session.ok_or_else(|| ReconcileError::SessionMissing(ObjectKey::of(&kyma.metadata)))?;
            match session
                .runtime()
                .list_as::<ModuleTemplate>(&ListOptions::in_namespace(session.namespace()))
                .await
            {
                Err(e) if e.is_no_match() => Vec::new(),
                other => other?,
            }
        } else {
            Vec::new()
        };

        let resolved = resolve_modules(kyma, &kcp_templates, &remote_templates);
        for module in &resolved {
            if let Err(error) = &module.result {
                self.events
                    .publish(
                        kyma,
                        EventSeverity::Warning,
                        reasons::MODULE_RECONCILIATION_ERROR,
                        error.to_string(),
                    )
                    .await;
            }
        }

        let sync_namespace = self.sync_namespace(kyma);
        let results = join_all(
            resolved
                .iter()
                .map(|module| self.reconcile_module(kyma, module, sync_namespace)),
        )
        .await;
        let mut statuses = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        statuses.extend(self.cleanup_removed_modules(kyma).await?);
        Ok(statuses)
    }

    async fn reconcile_module(
        &self,
        kyma: &Kyma,
        resolved: &ResolvedModule,
        sync_namespace: &str,
    ) -> Result<ModuleStatus, ReconcileError> {
        let previous = kyma.module_status(&resolved.module.name);
        let found = match &resolved.result {
            Ok(found) => found,
            Err(error @ TemplateError::NotAllowed { .. }) => {
                // visibility changed, the module must not stay installed
                let key = ObjectKey::new(kyma.namespace(), manifest_name(kyma, &resolved.module.name));
                ignore_not_found(self.control_plane.delete_as::<Manifest>(&key).await)?;
                return Ok(status::failed_module_status(resolved, error, previous));
            }
            Err(error) => return Ok(status::failed_module_status(resolved, error, previous)),
        };

        let desired = build_manifest(
            kyma,
            resolved,
            &found.template,
            self.config.in_kcp_mode,
            sync_namespace,
        );
        let existing = ignore_not_found(
            self.control_plane
                .get_as::<Manifest>(&ObjectKey::of(&desired.metadata))
                .await,
        )?;

        let manifest = match existing {
            Some(existing)
                if !found.outdated && !needs_update(&existing, &desired, previous, &found.template) =>
            {
                existing
            }
            _ => {
                let applied = self.control_plane.apply_as(&desired, OPERATOR_NAME).await?;
                self.renderer.render_and_apply(&applied).await?;
                debug!(
                    kyma = kyma.name(),
                    module = %resolved.module.name,
                    manifest = applied.name(),
                    version = %applied.spec.version,
                    "applied manifest"
                );
                applied
            }
        };
        Ok(status::installed_module_status(
            &resolved.module.name,
            &found.template,
            &manifest,
        ))
    }

    /// Delete Manifests of modules that left the spec
    ///
    /// Records stay, in state Deleting, until their Manifest is gone.
    async fn cleanup_removed_modules(&self, kyma: &Kyma) -> Result<Vec<ModuleStatus>, ReconcileError> {
        let mut remaining = Vec::new();
        for mut module_status in status::removed_module_statuses(kyma) {
            let Some(tracked) = &module_status.manifest else {
                continue;
            };
            let key = ObjectKey::new(tracked.namespace.clone(), tracked.name.clone());
            if ignore_not_found(self.control_plane.get_as::<Manifest>(&key).await)?.is_none() {
                info!(kyma = kyma.name(), module = %module_status.name, "module removed");
                continue;
            }
            ignore_not_found(self.control_plane.delete_as::<Manifest>(&key).await)?;
            module_status.state = State::Deleting;
            remaining.push(module_status);
        }
        Ok(remaining)
    }

    /// All Manifests created for `kyma`
    pub(crate) async fn related_manifests(&self, kyma: &Kyma) -> Result<Vec<Manifest>, ReconcileError> {
        let options = ListOptions::in_namespace(kyma.namespace()).with_label(KYMA_NAME_LABEL, kyma.name());
        Ok(self.control_plane.list_as::<Manifest>(&options).await?)
    }
}
