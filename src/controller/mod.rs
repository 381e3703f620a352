//! # Controller
//!
//! Kyma reconciler, per-resource error backoff and the HTTP server exposing
//! metrics and probes.

pub mod backoff;
pub mod reconciler;
pub mod server;

pub use backoff::{BackoffState, FibonacciBackoff};
pub use reconciler::{reconcile, KymaReconciler, NextAction, ReconcileError};
pub use server::{start_server, ServerState};
