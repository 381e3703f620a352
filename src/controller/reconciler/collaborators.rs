//! # External Collaborators
//!
//! Interfaces to the parts of the system the controller drives but does not
//! implement: the declarative engine that renders a Manifest into cluster
//! objects, and the runtime watcher webhook.

use crate::crd::{Kyma, Manifest};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to render manifest {manifest}: {message}")]
pub struct ManifestError {
    pub manifest: String,
    pub message: String,
}

/// Renders and applies the payload of a Manifest
#[async_trait]
pub trait ManifestRenderer: Send + Sync + std::fmt::Debug {
    async fn render_and_apply(&self, manifest: &Manifest) -> Result<(), ManifestError>;
}

/// Renderer for setups where a separate declarative controller watches Manifests
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredRenderer;

#[async_trait]
impl ManifestRenderer for DeferredRenderer {
    async fn render_and_apply(&self, _manifest: &Manifest) -> Result<(), ManifestError> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    /// The webhook's serving certificate has not been issued yet
    #[error("certificate for kyma {0} is not ready yet")]
    CertificateNotReady(String),

    #[error("webhook operation failed: {0}")]
    Failed(String),
}

impl WebhookError {
    pub fn is_certificate_not_ready(&self) -> bool {
        matches!(self, WebhookError::CertificateNotReady(_))
    }
}

/// Installs and removes the runtime watcher webhook in a tenant's runtime cluster
#[async_trait]
pub trait WebhookManager: Send + Sync + std::fmt::Debug {
    async fn install(&self, kyma: &Kyma) -> Result<(), WebhookError>;
    async fn remove(&self, kyma: &Kyma) -> Result<(), WebhookError>;
}
