//! # Resources
//!
//! The tagged union of kinds the controller reads and writes, plus the object key
//! used for caching and queueing.

use super::error::ClusterError;
use crate::crd::{crd_name, Kyma, Manifest, ModuleTemplate};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Namespace + name of an object. Cluster-scoped objects use an empty namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }

    pub fn of(meta: &ObjectMeta) -> Self {
        Self::new(
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        )
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Discriminant of [`Resource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Kyma,
    ModuleTemplate,
    Manifest,
    CustomResourceDefinition,
    Namespace,
    Secret,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Kyma => "Kyma",
            ResourceKind::ModuleTemplate => "ModuleTemplate",
            ResourceKind::Manifest => "Manifest",
            ResourceKind::CustomResourceDefinition => "CustomResourceDefinition",
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Secret => "Secret",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(
            self,
            ResourceKind::CustomResourceDefinition | ResourceKind::Namespace
        )
    }

    /// Name of the CRD that must be installed before the kind is served
    pub fn crd_name(&self) -> Option<String> {
        match self {
            ResourceKind::Kyma => Some(crd_name("kymas")),
            ResourceKind::ModuleTemplate => Some(crd_name("moduletemplates")),
            ResourceKind::Manifest => Some(crd_name("manifests")),
            _ => None,
        }
    }

    pub fn has_status(&self) -> bool {
        matches!(
            self,
            ResourceKind::Kyma | ResourceKind::Manifest | ResourceKind::CustomResourceDefinition
        )
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object of one of the known kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Kyma(Kyma),
    ModuleTemplate(ModuleTemplate),
    Manifest(Manifest),
    CustomResourceDefinition(CustomResourceDefinition),
    Namespace(Namespace),
    Secret(Secret),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Kyma(_) => ResourceKind::Kyma,
            Resource::ModuleTemplate(_) => ResourceKind::ModuleTemplate,
            Resource::Manifest(_) => ResourceKind::Manifest,
            Resource::CustomResourceDefinition(_) => ResourceKind::CustomResourceDefinition,
            Resource::Namespace(_) => ResourceKind::Namespace,
            Resource::Secret(_) => ResourceKind::Secret,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Resource::Kyma(o) => &o.metadata,
            Resource::ModuleTemplate(o) => &o.metadata,
            Resource::Manifest(o) => &o.metadata,
            Resource::CustomResourceDefinition(o) => &o.metadata,
            Resource::Namespace(o) => &o.metadata,
            Resource::Secret(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Resource::Kyma(o) => &mut o.metadata,
            Resource::ModuleTemplate(o) => &mut o.metadata,
            Resource::Manifest(o) => &mut o.metadata,
            Resource::CustomResourceDefinition(o) => &mut o.metadata,
            Resource::Namespace(o) => &mut o.metadata,
            Resource::Secret(o) => &mut o.metadata,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::of(self.metadata())
    }

    pub fn to_json(&self) -> Result<serde_json::Value, ClusterError> {
        let value = match self {
            Resource::Kyma(o) => serde_json::to_value(o)?,
            Resource::ModuleTemplate(o) => serde_json::to_value(o)?,
            Resource::Manifest(o) => serde_json::to_value(o)?,
            Resource::CustomResourceDefinition(o) => serde_json::to_value(o)?,
            Resource::Namespace(o) => serde_json::to_value(o)?,
            Resource::Secret(o) => serde_json::to_value(o)?,
        };
        Ok(value)
    }

    pub fn from_json(kind: ResourceKind, value: serde_json::Value) -> Result<Self, ClusterError> {
        let resource = match kind {
            ResourceKind::Kyma => Resource::Kyma(serde_json::from_value(value)?),
            ResourceKind::ModuleTemplate => Resource::ModuleTemplate(serde_json::from_value(value)?),
            ResourceKind::Manifest => Resource::Manifest(serde_json::from_value(value)?),
            ResourceKind::CustomResourceDefinition => {
                Resource::CustomResourceDefinition(serde_json::from_value(value)?)
            }
            ResourceKind::Namespace => Resource::Namespace(serde_json::from_value(value)?),
            ResourceKind::Secret => Resource::Secret(serde_json::from_value(value)?),
        };
        Ok(resource)
    }

    /// Clear server-populated metadata so the object can be applied to another cluster
    #[must_use]
    pub fn prepared_for_apply(mut self, namespace: Option<&str>) -> Self {
        clear_server_fields(self.metadata_mut(), namespace);
        self
    }
}

/// Clear server-populated fields and owner references, optionally moving the object to `namespace`
pub fn clear_server_fields(meta: &mut ObjectMeta, namespace: Option<&str>) {
    meta.resource_version = None;
    meta.uid = None;
    meta.managed_fields = None;
    meta.creation_timestamp = None;
    meta.generation = None;
    meta.deletion_timestamp = None;
    meta.owner_references = None;
    if let Some(namespace) = namespace {
        meta.namespace = Some(namespace.to_string());
    }
}

/// Static typing over [`Resource`]
pub trait KnownResource: Clone + Send + Sync + std::fmt::Debug + 'static {
    const KIND: ResourceKind;

    fn into_resource(self) -> Resource;

    fn from_resource(resource: Resource) -> Result<Self, ClusterError>;
}

macro_rules! known_resource {
    ($ty:ident) => {
        impl KnownResource for $ty {
            const KIND: ResourceKind = ResourceKind::$ty;

            fn into_resource(self) -> Resource {
                Resource::$ty(self)
            }

            fn from_resource(resource: Resource) -> Result<Self, ClusterError> {
                match resource {
                    Resource::$ty(object) => Ok(object),
                    other => Err(ClusterError::UnexpectedKind {
                        expected: ResourceKind::$ty,
                        actual: other.kind(),
                    }),
                }
            }
        }
    };
}

known_resource!(Kyma);
known_resource!(ModuleTemplate);
known_resource!(Manifest);
known_resource!(CustomResourceDefinition);
known_resource!(Namespace);
known_resource!(Secret);

/// Who manages a remote object, as recorded in its field-manager entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Applied by the catalog synchronizer
    CatalogSync,
    /// Created or managed by some other actor
    Foreign,
}

impl Ownership {
    /// Ownership as seen by `field_manager`
    pub fn of(meta: &ObjectMeta, field_manager: &str) -> Self {
        let owned = meta
            .managed_fields
            .as_ref()
            .is_some_and(|entries| {
                entries
                    .iter()
                    .any(|entry| entry.manager.as_deref() == Some(field_manager))
            });
        if owned {
            Ownership::CatalogSync
        } else {
            Ownership::Foreign
        }
    }
}
