//! # Lifecycle Manager
//!
//! A Kubernetes controller that reconciles Kyma tenants in the control plane
//! (KCP) and keeps them synchronized with the tenants' runtime clusters (SKR).
//!
//! ## Overview
//!
//! For every `Kyma` the controller:
//!
//! 1. **Resolves modules** - picks a `ModuleTemplate` per requested module by
//!    channel and version, refusing channel downgrades
//! 2. **Creates Manifests** - one child `Manifest` per module, owned by the Kyma
//! 3. **Mirrors the Kyma** - keeps a `Kyma` in the runtime cluster whose spec is
//!    the user-facing source of truth and whose status reflects the control plane
//! 4. **Syncs the catalog** - copies eligible module templates into the runtime
//!    cluster and removes the ones it owns that are no longer offered
//! 5. **Cleans up** - on deletion, removes remote state and child Manifests before
//!    releasing the finalizer, purging Manifests that outlive the purge timeout
//!
//! Runtime-cluster clients are cached per tenant and resolved through pluggable
//! connectors; all cluster access goes through [`cluster::ClusterClient`] so the
//! reconciler runs unchanged against the in-memory cluster of the `test-util`
//! feature in tests.

pub mod catalog;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod events;
pub mod observability;
pub mod remote;
pub mod runtime;
pub mod templates;
