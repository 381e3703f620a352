//! # In-Memory Cluster
//!
//! A [`ClusterClient`] that keeps objects in process memory.
//!
//! It emulates the API-server behaviour the controller relies on:
//!
//! - resource versions with optimistic-concurrency conflicts on update
//! - generations that move only when the object's content (not metadata/status) changes
//! - status-subresource semantics: `update` keeps status, `update_status` only touches status
//! - server-side apply that merges into the live object and records the field manager,
//!   leaving entries of other managers in place
//! - finalizer-gated deletion via deletion timestamps
//! - kinds that are not served until their CRD is created (`NoMatch`)
//!
//! Only compiled for tests and with the `test-util` feature.

use super::error::ClusterError;
use super::resource::{ObjectKey, Resource, ResourceKind};
use super::{ClusterClient, ListOptions};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ManagedFieldsEntry, Time};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// API verbs, used to inject failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Apply,
    Delete,
}

#[derive(Debug, Default)]
struct Store {
    objects: BTreeMap<(ResourceKind, ObjectKey), Resource>,
    unserved: HashSet<ResourceKind>,
    failures: HashSet<(Verb, ResourceKind, String)>,
    calls: HashMap<Verb, usize>,
    revision: u64,
}

impl Store {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn check(&mut self, verb: Verb, kind: ResourceKind, name: &str) -> Result<(), ClusterError> {
        *self.calls.entry(verb).or_default() += 1;
        if self.unserved.contains(&kind) {
            return Err(ClusterError::NoMatch(kind));
        }
        if self.failures.contains(&(verb, kind, name.to_string()))
            || self.failures.contains(&(verb, kind, String::new()))
        {
            return Err(ClusterError::Api {
                code: 500,
                message: format!("injected failure on {verb:?} {kind} {name}"),
            });
        }
        Ok(())
    }

    /// Creating a CRD starts serving the kind it defines
    fn on_crd_written(&mut self, resource: &Resource) {
        if let Resource::CustomResourceDefinition(crd) = resource {
            let name = crd.metadata.name.as_deref().unwrap_or_default();
            self.unserved
                .retain(|kind| kind.crd_name().as_deref() != Some(name));
        }
    }

    fn on_crd_removed(&mut self, key: &ObjectKey) {
        for kind in [
            ResourceKind::Kyma,
            ResourceKind::ModuleTemplate,
            ResourceKind::Manifest,
        ] {
            if kind.crd_name().as_deref() == Some(key.name.as_str()) {
                self.unserved.insert(kind);
            }
        }
    }
}

#[derive(Debug)]
pub struct InMemoryCluster {
    identity: String,
    store: Mutex<Store>,
}

impl InMemoryCluster {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            store: Mutex::new(Store::default()),
        }
    }

    /// Start without the CRDs of the given kinds; calls for them fail with `NoMatch`
    #[must_use]
    pub fn without_crds(self, kinds: &[ResourceKind]) -> Self {
        self.lock().unserved.extend(kinds.iter().copied());
        self
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object as-is (including managed fields and status), assigning server fields
    pub fn insert(&self, mut resource: Resource) {
        let mut store = self.lock();
        let revision = store.next_revision();
        let meta = resource.metadata_mut();
        meta.resource_version = Some(revision.clone());
        meta.uid.get_or_insert_with(|| format!("uid-{revision}"));
        meta.generation.get_or_insert(1);
        store.on_crd_written(&resource);
        store
            .objects
            .insert((resource.kind(), resource.key()), resource);
    }

    /// Make every `verb` call on the named object fail; an empty name matches all objects
    pub fn fail_on(&self, verb: Verb, kind: ResourceKind, name: &str) {
        self.lock().failures.insert((verb, kind, name.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn objects(&self, kind: ResourceKind) -> Vec<Resource> {
        self.lock()
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, resource)| resource.clone())
            .collect()
    }

    pub fn contains(&self, kind: ResourceKind, key: &ObjectKey) -> bool {
        self.lock().objects.contains_key(&(kind, key.clone()))
    }

    pub fn call_count(&self, verb: Verb) -> usize {
        self.lock().calls.get(&verb).copied().unwrap_or_default()
    }

    pub fn serves(&self, kind: ResourceKind) -> bool {
        !self.lock().unserved.contains(&kind)
    }
}

fn not_found(kind: ResourceKind, key: &ObjectKey) -> ClusterError {
    ClusterError::NotFound {
        kind,
        key: key.clone(),
    }
}

fn now() -> Result<Time, ClusterError> {
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    Ok(serde_json::from_value(serde_json::Value::String(timestamp))?)
}

/// Incoming object without server-populated fields; owner references are kept
fn without_server_fields(resource: &Resource) -> Result<serde_json::Value, ClusterError> {
    let owners = resource.metadata().owner_references.clone();
    let mut cleared = resource.clone().prepared_for_apply(None);
    cleared.metadata_mut().owner_references = owners;
    cleared.to_json()
}

/// Object content that drives the generation: everything but metadata and status
fn content(value: &serde_json::Value) -> serde_json::Value {
    let mut value = value.clone();
    if let Some(map) = value.as_object_mut() {
        map.remove("metadata");
        map.remove("status");
    }
    value
}

/// JSON merge: objects merge key by key, everything else is replaced
fn merge(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

fn set_status(value: &mut serde_json::Value, status: Option<serde_json::Value>) {
    if let Some(map) = value.as_object_mut() {
        match status {
            Some(status) => {
                map.insert("status".to_string(), status);
            }
            None => {
                map.remove("status");
            }
        }
    }
}

fn check_version(existing: &Resource, incoming: &Resource) -> Result<(), ClusterError> {
    match incoming.metadata().resource_version.as_deref() {
        Some(version) if Some(version) != existing.metadata().resource_version.as_deref() => {
            Err(ClusterError::Conflict {
                kind: incoming.kind(),
                key: incoming.key(),
                message: "the object has been modified; please apply your changes to the latest version and try again".to_string(),
            })
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Resource, ClusterError> {
        let mut store = self.lock();
        store.check(Verb::Get, kind, &key.name)?;
        store
            .objects
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| not_found(kind, key))
    }

    async fn list(&self, kind: ResourceKind, options: &ListOptions) -> Result<Vec<Resource>, ClusterError> {
        let mut store = self.lock();
        store.check(Verb::List, kind, "")?;
        Ok(store
            .objects
            .iter()
            .filter(|((k, _), resource)| *k == kind && options.matches(resource))
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, ClusterError> {
        let kind = resource.kind();
        let key = resource.key();
        let mut store = self.lock();
        store.check(Verb::Create, kind, &key.name)?;
        if store.objects.contains_key(&(kind, key.clone())) {
            return Err(ClusterError::Conflict {
                kind,
                key,
                message: "already exists".to_string(),
            });
        }

        let mut value = without_server_fields(resource)?;
        if kind.has_status() && kind != ResourceKind::CustomResourceDefinition {
            set_status(&mut value, None);
        }
        let mut created = Resource::from_json(kind, value)?;
        let revision = store.next_revision();
        let meta = created.metadata_mut();
        meta.uid = Some(format!("uid-{revision}"));
        meta.resource_version = Some(revision);
        meta.generation = Some(1);
        meta.creation_timestamp = Some(now()?);

        store.on_crd_written(&created);
        store.objects.insert((kind, key), created.clone());
        Ok(created)
    }

    async fn update(&self, resource: &Resource) -> Result<Resource, ClusterError> {
        let kind = resource.kind();
        let key = resource.key();
        let mut store = self.lock();
        store.check(Verb::Update, kind, &key.name)?;
        let existing = store
            .objects
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| not_found(kind, &key))?;
        check_version(&existing, resource)?;

        let existing_value = existing.to_json()?;
        let mut value = resource.to_json()?;
        if kind.has_status() {
            set_status(&mut value, existing_value.get("status").cloned());
        }
        let content_changed = content(&value) != content(&existing_value);
        let mut updated = Resource::from_json(kind, value)?;

        let old_meta = existing.metadata();
        let revision = store.next_revision();
        let meta = updated.metadata_mut();
        meta.uid.clone_from(&old_meta.uid);
        meta.creation_timestamp.clone_from(&old_meta.creation_timestamp);
        meta.deletion_timestamp.clone_from(&old_meta.deletion_timestamp);
        meta.managed_fields.clone_from(&old_meta.managed_fields);
        meta.resource_version = Some(revision);
        meta.generation = Some(old_meta.generation.unwrap_or(1) + i64::from(content_changed));

        let finalized = meta.deletion_timestamp.is_some()
            && meta.finalizers.as_ref().is_none_or(Vec::is_empty);
        if finalized {
            store.objects.remove(&(kind, key));
        } else {
            store.objects.insert((kind, key), updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(&self, resource: &Resource) -> Result<Resource, ClusterError> {
        let kind = resource.kind();
        let key = resource.key();
        let mut store = self.lock();
        store.check(Verb::UpdateStatus, kind, &key.name)?;
        let existing = store
            .objects
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| not_found(kind, &key))?;
        check_version(&existing, resource)?;

        let mut value = existing.to_json()?;
        set_status(&mut value, resource.to_json()?.get("status").cloned());
        let mut updated = Resource::from_json(kind, value)?;
        updated.metadata_mut().resource_version = Some(store.next_revision());
        store.objects.insert((kind, key), updated.clone());
        Ok(updated)
    }

    async fn apply(&self, resource: &Resource, field_manager: &str) -> Result<Resource, ClusterError> {
        let kind = resource.kind();
        let key = resource.key();
        let mut store = self.lock();
        store.check(Verb::Apply, kind, &key.name)?;

        let mut incoming = without_server_fields(resource)?;
        if kind.has_status() && kind != ResourceKind::CustomResourceDefinition {
            set_status(&mut incoming, None);
        }
        let entry = ManagedFieldsEntry {
            manager: Some(field_manager.to_string()),
            operation: Some("Apply".to_string()),
            time: Some(now()?),
            ..Default::default()
        };

        let existing = store.objects.get(&(kind, key.clone())).cloned();
        let revision = store.next_revision();
        let applied = match existing {
            Some(existing) => {
                let existing_value = existing.to_json()?;
                let mut merged = existing_value.clone();
                merge(&mut merged, incoming);
                let content_changed = content(&merged) != content(&existing_value);
                let mut applied = Resource::from_json(kind, merged)?;
                let old_meta = existing.metadata();
                let meta = applied.metadata_mut();
                meta.uid.clone_from(&old_meta.uid);
                meta.creation_timestamp.clone_from(&old_meta.creation_timestamp);
                meta.deletion_timestamp.clone_from(&old_meta.deletion_timestamp);
                meta.generation = Some(old_meta.generation.unwrap_or(1) + i64::from(content_changed));
                let mut managers: Vec<ManagedFieldsEntry> = old_meta
                    .managed_fields
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|e| e.manager.as_deref() != Some(field_manager))
                    .collect();
                managers.push(entry);
                meta.managed_fields = Some(managers);
                meta.resource_version = Some(revision);
                applied
            }
            None => {
                let mut applied = Resource::from_json(kind, incoming)?;
                let meta = applied.metadata_mut();
                meta.uid = Some(format!("uid-{revision}"));
                meta.generation = Some(1);
                meta.creation_timestamp = Some(now()?);
                meta.managed_fields = Some(vec![entry]);
                meta.resource_version = Some(revision);
                applied
            }
        };

        store.on_crd_written(&applied);
        store.objects.insert((kind, key), applied.clone());
        Ok(applied)
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), ClusterError> {
        let mut store = self.lock();
        store.check(Verb::Delete, kind, &key.name)?;
        let revision = store.next_revision();
        let Some(object) = store.objects.get_mut(&(kind, key.clone())) else {
            return Err(not_found(kind, key));
        };

        let meta = object.metadata_mut();
        if meta.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
            if meta.deletion_timestamp.is_none() {
                meta.deletion_timestamp = Some(now()?);
                meta.resource_version = Some(revision);
            }
            return Ok(());
        }

        store.objects.remove(&(kind, key.clone()));
        if kind == ResourceKind::CustomResourceDefinition {
            store.on_crd_removed(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterClientExt;
    use crate::crd::{Kyma, KymaSpec, ModuleTemplate, ModuleTemplateSpec};

    fn kyma(name: &str) -> Kyma {
        let mut kyma = Kyma::new(name, KymaSpec::default());
        kyma.metadata.namespace = Some("kcp-system".to_string());
        kyma
    }

    #[tokio::test]
    async fn test_create_get_and_conflict_on_stale_update() {
        let cluster = InMemoryCluster::new("kcp");
        let created = cluster.create_as(&kyma("tenant")).await.unwrap();
        assert_eq!(created.metadata.generation, Some(1));

        let mut first = created.clone();
        first.spec.channel = "fast".to_string();
        let updated = cluster.update_as(&first).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(2));

        let mut stale = created;
        stale.spec.channel = "regular".to_string();
        let err = cluster.update_as(&stale).await.unwrap_err();
        assert!(matches!(err, ClusterError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_keeps_status_and_metadata_change_keeps_generation() {
        let cluster = InMemoryCluster::new("kcp");
        let mut created = cluster.create_as(&kyma("tenant")).await.unwrap();
        created.status_mut().state = crate::crd::State::Processing;
        let with_status = cluster.update_status_as(&created).await.unwrap();
        assert_eq!(with_status.state(), crate::crd::State::Processing);

        let mut labelled = with_status.clone();
        labelled.status = None;
        labelled
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("a".to_string(), "b".to_string());
        let updated = cluster.update_as(&labelled).await.unwrap();
        assert_eq!(updated.state(), crate::crd::State::Processing);
        assert_eq!(updated.metadata.generation, Some(1));
    }

    #[tokio::test]
    async fn test_finalizer_gated_delete() {
        let cluster = InMemoryCluster::new("kcp");
        let mut object = kyma("tenant");
        object.metadata.finalizers = Some(vec!["operator.kyma-project.io/Kyma".to_string()]);
        cluster.create_as(&object).await.unwrap();

        let key = ObjectKey::new("kcp-system", "tenant");
        cluster.delete_as::<Kyma>(&key).await.unwrap();
        let marked: Kyma = cluster.get_as(&key).await.unwrap();
        assert!(marked.is_deleting());

        let mut released = marked;
        released.metadata.finalizers = Some(Vec::new());
        cluster.update_as(&released).await.unwrap();
        assert!(!cluster.contains(ResourceKind::Kyma, &key));
    }

    #[tokio::test]
    async fn test_apply_merges_and_keeps_foreign_managers() {
        let cluster = InMemoryCluster::new("skr");
        let mut foreign = ModuleTemplate::new("keda", ModuleTemplateSpec::default());
        foreign.metadata.namespace = Some("kyma-system".to_string());
        foreign.metadata.labels = Some(BTreeMap::from([("team".to_string(), "a".to_string())]));
        foreign.metadata.managed_fields = Some(vec![ManagedFieldsEntry {
            manager: Some("kubectl".to_string()),
            ..Default::default()
        }]);
        cluster.insert(Resource::ModuleTemplate(foreign));

        let mut desired = ModuleTemplate::new(
            "keda",
            ModuleTemplateSpec {
                channel: "regular".to_string(),
                ..Default::default()
            },
        );
        desired.metadata.namespace = Some("kyma-system".to_string());
        let applied = cluster.apply_as(&desired, "catalog-sync").await.unwrap();

        assert_eq!(applied.spec.channel, "regular");
        assert_eq!(
            applied.metadata.labels.unwrap().get("team").map(String::as_str),
            Some("a")
        );
        let managers: Vec<_> = applied
            .metadata
            .managed_fields
            .unwrap()
            .into_iter()
            .filter_map(|e| e.manager)
            .collect();
        assert_eq!(managers, vec!["kubectl".to_string(), "catalog-sync".to_string()]);
    }

    #[tokio::test]
    async fn test_unserved_kind_until_crd_is_created() {
        let cluster = InMemoryCluster::new("skr").without_crds(&[ResourceKind::ModuleTemplate]);
        let err = cluster
            .list(ResourceKind::ModuleTemplate, &ListOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_no_match());

        let crd = <ModuleTemplate as kube::CustomResourceExt>::crd();
        cluster
            .create(&Resource::CustomResourceDefinition(crd))
            .await
            .unwrap();
        assert!(cluster.serves(ResourceKind::ModuleTemplate));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let cluster = InMemoryCluster::new("skr");
        cluster.fail_on(Verb::Get, ResourceKind::Kyma, "tenant");
        let err = cluster
            .get(ResourceKind::Kyma, &ObjectKey::new("kcp-system", "tenant"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Api { code: 500, .. }));
        assert_eq!(cluster.call_count(Verb::Get), 1);
    }
}
