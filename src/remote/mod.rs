//! # Remote
//!
//! Everything that reaches into a tenant's runtime cluster: the client cache,
//! client resolution per sync strategy, the per-reconcile sync session and CRD
//! upgrades.

mod cache;
pub mod crd_sync;
mod error;
mod lookup;
mod session;

pub use cache::ClientCache;
pub use error::{RemoteError, SessionError};
pub use lookup::{ClusterConnector, LocalClientConnector, RemoteClientLookup, SecretConnector};
pub use session::SyncSession;
