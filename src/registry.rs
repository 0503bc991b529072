//! Process-wide cache of live hub connections.
//!
//! [`HubRegistry`] hands out exactly one [`GameHub`] per
//! `(room_code, username)` pair so every UI consumer shares the same
//! underlying connection. It is an explicit object passed by reference —
//! not a module-level global — so tests (and embedders) can run isolated
//! registries side by side.
//!
//! Lifecycle: create-on-first-use via
//! [`get_or_create`](HubRegistry::get_or_create); explicit teardown via
//! [`dispose`](HubRegistry::dispose), which both stops the transport and
//! removes the cache entry so a later join builds a fresh connection
//! instead of resuming a stale one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tracing::debug;

use crate::hub::GameHub;

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

type HubKey = (String, String);

/// Registry of live hubs keyed by `(room_code, username)`.
#[derive(Debug, Default)]
pub struct HubRegistry {
    hubs: StdMutex<HashMap<HubKey, Arc<GameHub>>>,
}

impl HubRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached hub for the key, or build and cache one with
    /// `build`. Idempotent: concurrent calls for the same key observe a
    /// single cached instance (the map lock is held across the build).
    pub fn get_or_create(
        &self,
        room_code: &str,
        username: &str,
        build: impl FnOnce() -> GameHub,
    ) -> Arc<GameHub> {
        let key = (room_code.to_string(), username.to_string());
        let mut hubs = lock(&self.hubs);
        Arc::clone(hubs.entry(key).or_insert_with(|| {
            debug!(%room_code, %username, "creating hub connection");
            Arc::new(build())
        }))
    }

    /// The cached hub for the key, if one exists.
    pub fn get(&self, room_code: &str, username: &str) -> Option<Arc<GameHub>> {
        let key = (room_code.to_string(), username.to_string());
        lock(&self.hubs).get(&key).map(Arc::clone)
    }

    /// Stop the hub for the key and drop it from the cache. A subsequent
    /// [`get_or_create`](Self::get_or_create) builds a fresh connection.
    pub async fn dispose(&self, room_code: &str, username: &str) {
        let key = (room_code.to_string(), username.to_string());
        let hub = lock(&self.hubs).remove(&key);
        if let Some(hub) = hub {
            debug!(%room_code, %username, "disposing hub connection");
            hub.stop().await;
        }
    }

    /// Number of cached connections.
    pub fn len(&self) -> usize {
        lock(&self.hubs).len()
    }

    /// Whether the registry holds no connections.
    pub fn is_empty(&self) -> bool {
        lock(&self.hubs).is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::ColorNodesError;
    use crate::hub::HubConfig;
    use crate::transport::{Connector, Transport};
    use async_trait::async_trait;

    /// Connector that never succeeds; registry tests only exercise caching.
    struct NeverConnector;

    #[async_trait]
    impl Connector for NeverConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>, ColorNodesError> {
            Err(ColorNodesError::Connect("not wired in this test".into()))
        }
    }

    fn build_hub(room: &str, user: &str) -> GameHub {
        GameHub::new(NeverConnector, HubConfig::new(room, user))
    }

    #[test]
    fn same_key_returns_the_same_instance() {
        let registry = HubRegistry::new();
        let first = registry.get_or_create("ABCD", "alice", || build_hub("ABCD", "alice"));
        let second = registry.get_or_create("ABCD", "alice", || build_hub("ABCD", "alice"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_identities_get_distinct_connections() {
        let registry = HubRegistry::new();
        let alice = registry.get_or_create("ABCD", "alice", || build_hub("ABCD", "alice"));
        let bob = registry.get_or_create("ABCD", "bob", || build_hub("ABCD", "bob"));
        assert!(!Arc::ptr_eq(&alice, &bob));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn get_does_not_create() {
        let registry = HubRegistry::new();
        assert!(registry.get("ABCD", "alice").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dispose_removes_so_next_join_is_fresh() {
        let registry = HubRegistry::new();
        let first = registry.get_or_create("ABCD", "alice", || build_hub("ABCD", "alice"));

        registry.dispose("ABCD", "alice").await;
        assert!(registry.get("ABCD", "alice").is_none());

        let second = registry.get_or_create("ABCD", "alice", || build_hub("ABCD", "alice"));
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn dispose_of_unknown_key_is_a_noop() {
        let registry = HubRegistry::new();
        registry.dispose("ZZZZ", "nobody").await;
        assert!(registry.is_empty());
    }

    #[test]
    fn isolated_registries_do_not_share_state() {
        let a = HubRegistry::new();
        let b = HubRegistry::new();
        a.get_or_create("ABCD", "alice", || build_hub("ABCD", "alice"));
        assert!(b.is_empty());
    }
}
