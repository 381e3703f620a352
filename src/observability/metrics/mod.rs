//! # Metrics
//!
//! Prometheus metrics for reconciliation and multi-cluster synchronization.
//!
//! Metrics live in `LazyLock` statics and are exposed through plain functions so
//! call sites do not depend on `prometheus` types. [`register_metrics`] must run
//! once at startup before `/metrics` is scraped.

mod controller_metrics;
pub(crate) mod registry;
mod sync_metrics;

pub use controller_metrics::*;
pub use sync_metrics::*;

use anyhow::Result;
use prometheus::{Encoder, TextEncoder};
use registry::REGISTRY;

/// Register all metrics with the registry
pub fn register_metrics() -> Result<()> {
    controller_metrics::register_controller_metrics()?;
    sync_metrics::register_sync_metrics()?;
    Ok(())
}

/// Render all registered metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
