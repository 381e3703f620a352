//! # Client Cache
//!
//! Concurrency-safe map from tenant identity to a live runtime-cluster client,
//! so reconciles do not reconnect every time.
//!
//! At most one client is cached per key. Replacing an entry does not change the
//! size; deleting a missing key is a no-op. The `remote_clients` gauge follows
//! genuine inserts and removals only.

use crate::cluster::{ObjectKey, SharedCluster};
use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct ClientCache {
    clients: RwLock<HashMap<ObjectKey, SharedCluster>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<SharedCluster> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Insert or replace the client for `key`. Returns true if the key was new.
    pub fn set(&self, key: ObjectKey, client: SharedCluster) -> bool {
        let previous = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, client);
        let inserted = previous.is_none();
        if inserted {
            metrics::increment_remote_clients();
        }
        inserted
    }

    /// Evict the client for `key`. Returns true if an entry was removed.
    pub fn del(&self, key: &ObjectKey) -> bool {
        let removed = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            metrics::decrement_remote_clients();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterClient, InMemoryCluster};
    use std::sync::Arc;

    fn client(name: &str) -> SharedCluster {
        Arc::new(InMemoryCluster::new(name))
    }

    #[test]
    fn test_set_get_del() {
        let cache = ClientCache::new();
        let key = ObjectKey::new("kcp-system", "tenant");
        assert!(cache.get(&key).is_none());

        assert!(cache.set(key.clone(), client("skr-1")));
        assert_eq!(cache.get(&key).unwrap().identity(), "skr-1");

        assert!(cache.del(&key));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replace_does_not_grow() {
        let cache = ClientCache::new();
        let key = ObjectKey::new("kcp-system", "tenant");
        assert!(cache.set(key.clone(), client("skr-1")));
        assert!(!cache.set(key.clone(), client("skr-2")));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap().identity(), "skr-2");
    }

    #[test]
    fn test_del_missing_key_is_noop() {
        let cache = ClientCache::new();
        cache.set(ObjectKey::new("kcp-system", "a"), client("a"));
        assert!(!cache.del(&ObjectKey::new("kcp-system", "missing")));
        assert_eq!(cache.len(), 1);
    }
}
