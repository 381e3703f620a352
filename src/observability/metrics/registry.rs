//! # Registry
//!
//! Process-wide Prometheus registry every metric module registers into.

use prometheus::Registry;
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);
