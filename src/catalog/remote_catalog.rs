//! # Remote Catalog
//!
//! Pushes the control plane's module templates into a runtime cluster.
//!
//! Templates are server-side applied under the `catalog-sync` field manager with
//! forced ownership, so fields other actors own on the same object stay in place.
//! Remote templates missing from the control plane are deleted only when
//! `catalog-sync` owns them; templates created by anyone else are never touched.
//!
//! Both phases fan out with a bounded concurrency limit. Per-item failures are
//! collected into [`CatalogError::Aggregate`] without undoing completed work.

use super::error::{CatalogError, CatalogItemError, CatalogPhase};
use crate::cluster::{
    clear_server_fields, ClusterClient, ClusterClientExt, ClusterError, ListOptions, ObjectKey,
    Ownership, Resource,
};
use crate::constants::{CATALOG_SYNC_FIELD_MANAGER, DEFAULT_CATALOG_SYNC_CONCURRENCY};
use crate::crd::ModuleTemplate;
use crate::observability::metrics;
use crate::remote::SyncSession;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A template found in the runtime cluster, tagged with who manages it
#[derive(Debug, Clone)]
pub struct RemoteTemplate {
    pub template: ModuleTemplate,
    pub ownership: Ownership,
}

impl RemoteTemplate {
    pub fn new(template: ModuleTemplate) -> Self {
        let ownership = Ownership::of(&template.metadata, CATALOG_SYNC_FIELD_MANAGER);
        Self { template, ownership }
    }

    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::CatalogSync
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::of(&self.template.metadata)
    }
}

#[derive(Debug, Clone)]
pub struct RemoteCatalog {
    field_manager: String,
    concurrency: usize,
}

impl Default for RemoteCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_CATALOG_SYNC_CONCURRENCY)
    }
}

impl RemoteCatalog {
    pub fn new(concurrency: usize) -> Self {
        Self {
            field_manager: CATALOG_SYNC_FIELD_MANAGER.to_string(),
            concurrency: concurrency.max(1),
        }
    }

    /// Template as it is applied to the runtime cluster
    fn prepare(template: &ModuleTemplate, namespace: &str) -> ModuleTemplate {
        let mut prepared = template.clone();
        clear_server_fields(&mut prepared.metadata, Some(namespace));
        prepared
    }

    /// Make the runtime catalog match `kcp_templates`
    pub async fn create_or_update(
        &self,
        session: &SyncSession,
        kcp_templates: &[ModuleTemplate],
    ) -> Result<(), CatalogError> {
        let desired: Vec<ModuleTemplate> = kcp_templates
            .iter()
            .map(|template| Self::prepare(template, session.namespace()))
            .collect();

        let mut failures = self.apply_all(session, &desired).await;

        if failures.iter().any(|(_, err)| err.is_no_match()) {
            info!(
                cluster = session.runtime().identity(),
                "ModuleTemplate CRD missing in runtime cluster, installing it"
            );
            session
                .install_crd("moduletemplates")
                .await
                .map_err(CatalogError::CrdBootstrap)?;
            let retry: Vec<ModuleTemplate> = failures
                .drain(..)
                .map(|(template, _)| template)
                .collect();
            failures = self.apply_all(session, &retry).await;
        }

        let mut errors: Vec<CatalogItemError> = failures
            .into_iter()
            .map(|(template, source)| CatalogItemError {
                phase: CatalogPhase::Apply,
                template: ObjectKey::of(&template.metadata).to_string(),
                source,
            })
            .collect();

        let remote = match self.list_remote(session).await {
            Ok(remote) => remote,
            Err(err) if err.is_no_match() => Vec::new(),
            Err(err) => return Err(CatalogError::List(err)),
        };
        let obsolete = Self::diffs_to_delete(&remote, &desired);
        errors.extend(self.delete_all(session, obsolete).await);

        if errors.is_empty() {
            debug!(
                cluster = session.runtime().identity(),
                templates = desired.len(),
                "runtime catalog in sync"
            );
            Ok(())
        } else {
            metrics::increment_catalog_sync_errors();
            Err(CatalogError::Aggregate(errors))
        }
    }

    /// Remove every template `catalog-sync` owns from the runtime cluster
    pub async fn delete(&self, session: &SyncSession) -> Result<(), CatalogError> {
        let remote = match self.list_remote(session).await {
            Ok(remote) => remote,
            Err(err) if err.is_no_match() || err.is_not_found() => return Ok(()),
            Err(err) => return Err(CatalogError::List(err)),
        };
        let owned: Vec<RemoteTemplate> = remote.into_iter().filter(RemoteTemplate::is_owned).collect();
        let errors = self.delete_all(session, owned).await;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::Aggregate(errors))
        }
    }

    pub async fn list_remote(&self, session: &SyncSession) -> Result<Vec<RemoteTemplate>, ClusterError> {
        let templates: Vec<ModuleTemplate> = session.runtime().list_as(&ListOptions::default()).await?;
        Ok(templates.into_iter().map(RemoteTemplate::new).collect())
    }

    /// Remote templates that are absent from `desired` and owned by catalog sync
    pub fn diffs_to_delete(remote: &[RemoteTemplate], desired: &[ModuleTemplate]) -> Vec<RemoteTemplate> {
        let present: HashSet<ObjectKey> = desired
            .iter()
            .map(|template| ObjectKey::of(&template.metadata))
            .collect();
        remote
            .iter()
            .filter(|template| template.is_owned() && !present.contains(&template.key()))
            .cloned()
            .collect()
    }

    /// Apply concurrently; returns the templates that failed with their error
    async fn apply_all(
        &self,
        session: &SyncSession,
        templates: &[ModuleTemplate],
    ) -> Vec<(ModuleTemplate, ClusterError)> {
        let runtime = session.runtime();
        let field_manager = self.field_manager.as_str();
        stream::iter(templates.iter().cloned())
            .map(|template| async move {
                let resource = Resource::ModuleTemplate(template.clone());
                match runtime.apply(&resource, field_manager).await {
                    Ok(_) => {
                        metrics::increment_catalog_templates_applied();
                        None
                    }
                    Err(err) => Some((template, err)),
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(std::future::ready)
            .collect()
            .await
    }

    async fn delete_all(&self, session: &SyncSession, templates: Vec<RemoteTemplate>) -> Vec<CatalogItemError> {
        let runtime = session.runtime();
        stream::iter(templates)
            .map(|template| async move {
                let key = template.key();
                match runtime.delete_as::<ModuleTemplate>(&key).await {
                    Ok(()) => {
                        metrics::increment_catalog_templates_deleted();
                        debug!(template = %key, "deleted obsolete catalog template");
                        None
                    }
                    Err(err) if err.is_not_found() => None,
                    Err(source) => {
                        warn!(template = %key, error = %source, "failed to delete catalog template");
                        Some(CatalogItemError {
                            phase: CatalogPhase::Delete,
                            template: key.to_string(),
                            source,
                        })
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(std::future::ready)
            .collect()
            .await
    }
}
