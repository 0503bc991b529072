//! Persisted local identity and per-room session cache.
//!
//! The client keeps two small pieces of state across reloads: who the
//! local participant is (`{id, username}` under one well-known key) and
//! which game is active in each room (`game_{room_code}`), so a reload
//! mid-game can rejoin without a fresh lobby round trip.
//!
//! Persistence goes through the injectable [`KeyValueStorage`] seam:
//! [`MemoryStorage`] for tests, [`FileStorage`] for native builds.
//! Whatever is loaded is validated before use — a stored identity with a
//! non-positive id or an empty name is discarded, never trusted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ColorNodesError, Result};
use crate::protocol::{GameId, PlayerId};

/// Well-known key the local identity lives under.
pub const IDENTITY_KEY: &str = "color_nodes_user";

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── Storage seam ────────────────────────────────────────────────────

/// Minimal string key-value persistence.
pub trait KeyValueStorage: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;
    /// Write a value.
    fn set(&self, key: &str, value: &str);
    /// Delete a value.
    fn remove(&self, key: &str);
}

/// In-memory storage; state dies with the process. Meant for tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: StdMutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// An empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        lock(&self.entries).insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        lock(&self.entries).remove(key);
    }
}

/// Storage backed by a single JSON map on disk.
///
/// Read and write failures are logged and treated as an empty map — a
/// corrupt or missing file must never take the client down, it only costs
/// the cached session.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Use (or create on first write) the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_map(&self) -> HashMap<String, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), "discarding corrupt session file: {e}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) {
        match serde_json::to_string_pretty(map) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.path, raw) {
                    warn!(path = %self.path.display(), "failed to persist session file: {e}");
                }
            }
            Err(e) => warn!("failed to serialize session map: {e}"),
        }
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.read_map().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut map = self.read_map();
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map);
    }

    fn remove(&self, key: &str) {
        let mut map = self.read_map();
        if map.remove(key).is_some() {
            self.write_map(&map);
        }
    }
}

// ── Identity ────────────────────────────────────────────────────────

/// The local participant as persisted across sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalIdentity {
    pub id: PlayerId,
    pub username: String,
}

impl LocalIdentity {
    /// A usable identity has a positive id and a non-empty name.
    pub fn is_valid(&self) -> bool {
        self.id > 0 && !self.username.trim().is_empty()
    }
}

/// Typed access to the persisted session state.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl SessionStore {
    /// Wrap a storage backend.
    pub fn new(storage: impl KeyValueStorage + 'static) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    /// Wrap an already-shared storage backend.
    pub fn from_shared(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    // ── Identity ────────────────────────────────────────────────────

    /// Load the stored identity. Malformed or invalid entries are removed
    /// and reported as absent rather than returned.
    pub fn load_identity(&self) -> Option<LocalIdentity> {
        let raw = self.storage.get(IDENTITY_KEY)?;
        match serde_json::from_str::<LocalIdentity>(&raw) {
            Ok(identity) if identity.is_valid() => Some(identity),
            Ok(_) => {
                warn!("stored identity failed validation, discarding");
                self.storage.remove(IDENTITY_KEY);
                None
            }
            Err(e) => {
                warn!("stored identity is malformed, discarding: {e}");
                self.storage.remove(IDENTITY_KEY);
                None
            }
        }
    }

    /// Persist an identity.
    ///
    /// # Errors
    ///
    /// Returns [`ColorNodesError::Validation`] for an invalid identity;
    /// nothing is written in that case.
    pub fn save_identity(&self, identity: &LocalIdentity) -> Result<()> {
        if !identity.is_valid() {
            return Err(ColorNodesError::Validation(
                "identity needs a positive id and a non-empty name".into(),
            ));
        }
        let raw = serde_json::to_string(identity)?;
        self.storage.set(IDENTITY_KEY, &raw);
        Ok(())
    }

    /// Forget the stored identity.
    pub fn clear_identity(&self) {
        self.storage.remove(IDENTITY_KEY);
    }

    // ── Active game cache ───────────────────────────────────────────

    /// Remember the active game of a room so a reload can rejoin it.
    pub fn cache_active_game(&self, room_code: &str, game_id: &str) {
        self.storage.set(&Self::game_key(room_code), game_id);
    }

    /// The cached active game for a room, if any.
    pub fn active_game(&self, room_code: &str) -> Option<GameId> {
        self.storage.get(&Self::game_key(room_code))
    }

    /// Drop the cached game id — called when leaving a finished game or
    /// when the server reports the game gone, so a stale id never
    /// survives a room reset.
    pub fn clear_active_game(&self, room_code: &str) {
        self.storage.remove(&Self::game_key(room_code));
    }

    fn game_key(room_code: &str) -> String {
        format!("game_{room_code}")
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
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

    fn memory_session() -> SessionStore {
        SessionStore::new(MemoryStorage::new())
    }

    #[test]
    fn identity_round_trips() {
        let session = memory_session();
        let identity = LocalIdentity {
            id: 7,
            username: "alice".into(),
        };
        session.save_identity(&identity).unwrap();
        assert_eq!(session.load_identity(), Some(identity));
    }

    #[test]
    fn invalid_identity_is_not_saved() {
        let session = memory_session();
        let err = session
            .save_identity(&LocalIdentity {
                id: 0,
                username: "alice".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ColorNodesError::Validation(_)));
        assert!(session.load_identity().is_none());
    }

    #[test]
    fn stored_invalid_identity_is_discarded_on_load() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(IDENTITY_KEY, r#"{"id":-3,"username":"alice"}"#);
        let session = SessionStore::from_shared(storage.clone());

        assert!(session.load_identity().is_none());
        // The bad entry was removed, not left around to be re-trusted.
        assert!(storage.get(IDENTITY_KEY).is_none());
    }

    #[test]
    fn malformed_identity_json_is_discarded_on_load() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(IDENTITY_KEY, "{not json");
        let session = SessionStore::from_shared(storage.clone());

        assert!(session.load_identity().is_none());
        assert!(storage.get(IDENTITY_KEY).is_none());
    }

    #[test]
    fn whitespace_name_fails_validation() {
        assert!(!LocalIdentity {
            id: 5,
            username: "   ".into()
        }
        .is_valid());
    }

    #[test]
    fn clear_identity_forgets() {
        let session = memory_session();
        session
            .save_identity(&LocalIdentity {
                id: 7,
                username: "alice".into(),
            })
            .unwrap();
        session.clear_identity();
        assert!(session.load_identity().is_none());
    }

    #[test]
    fn active_game_cache_is_scoped_per_room() {
        let session = memory_session();
        session.cache_active_game("ABCD", "g1");
        session.cache_active_game("WXYZ", "g2");

        assert_eq!(session.active_game("ABCD").as_deref(), Some("g1"));
        assert_eq!(session.active_game("WXYZ").as_deref(), Some("g2"));

        session.clear_active_game("ABCD");
        assert!(session.active_game("ABCD").is_none());
        assert_eq!(session.active_game("WXYZ").as_deref(), Some("g2"));
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        {
            let session = SessionStore::new(FileStorage::new(&path));
            session
                .save_identity(&LocalIdentity {
                    id: 7,
                    username: "alice".into(),
                })
                .unwrap();
            session.cache_active_game("ABCD", "g1");
        }

        let reopened = SessionStore::new(FileStorage::new(&path));
        assert_eq!(
            reopened.load_identity(),
            Some(LocalIdentity {
                id: 7,
                username: "alice".into()
            })
        );
        assert_eq!(reopened.active_game("ABCD").as_deref(), Some("g1"));
    }

    #[test]
    fn corrupt_session_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "}}}not json").unwrap();

        let session = SessionStore::new(FileStorage::new(&path));
        assert!(session.load_identity().is_none());

        // Writing afterwards works normally.
        session.cache_active_game("ABCD", "g1");
        assert_eq!(session.active_game("ABCD").as_deref(), Some("g1"));
    }
}
