//! Session Store
//!
//! Keeps at most one live session id per practice scenario. The id is what the
//! gatekeeper counts messages and session age against, so it must survive a
//! host restart and must be dropped as soon as the gatekeeper ends the session.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 11;

/// A protection session as tracked on the client side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub scenario_key: String,
    /// Successful remote calls made under this id.
    pub message_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(scenario_key: &str) -> Self {
        Self {
            id: generate_session_id(),
            scenario_key: scenario_key.to_string(),
            message_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Generates an opaque id of the form `session_<unix millis>_<random base36>`.
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("session_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// Scoped key/value persistence of session ids, keyed by scenario.
///
/// Implementations never fail: storage problems degrade to in-memory behavior.
pub trait SessionStore: Send + Sync {
    /// Returns the live id for `scenario_key`, creating and persisting one if needed.
    fn get_or_create(&self, scenario_key: &str) -> String;

    /// Removes any stored session for `scenario_key`. Idempotent.
    fn clear(&self, scenario_key: &str);

    /// Returns a snapshot of the stored session, if any.
    fn session(&self, scenario_key: &str) -> Option<Session>;

    /// Counts one successful remote call against the live session.
    fn record_message(&self, scenario_key: &str);
}

fn lock(map: &Mutex<HashMap<String, Session>>) -> MutexGuard<'_, HashMap<String, Session>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get_or_create(&self, scenario_key: &str) -> String {
        lock(&self.sessions)
            .entry(scenario_key.to_string())
            .or_insert_with(|| {
                debug!(scenario_key, "Creating in-memory session");
                Session::new(scenario_key)
            })
            .id
            .clone()
    }

    fn clear(&self, scenario_key: &str) {
        lock(&self.sessions).remove(scenario_key);
    }

    fn session(&self, scenario_key: &str) -> Option<Session> {
        lock(&self.sessions).get(scenario_key).cloned()
    }

    fn record_message(&self, scenario_key: &str) {
        if let Some(session) = lock(&self.sessions).get_mut(scenario_key) {
            session.message_count += 1;
        }
    }
}

/// Store backed by a single JSON file.
///
/// The file is read once on construction and rewritten after every mutation.
/// Writes are synchronous and run under the lock on the calling task.
/// Once a write fails the store keeps working from memory and stops touching
/// the file.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    sessions: Mutex<HashMap<String, Session>>,
    persistent: AtomicBool,
}

impl FileSessionStore {
    pub const FILE_NAME: &'static str = "sessions.json";

    /// Opens (or prepares) `<dir>/sessions.json`.
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let path = dir.join(Self::FILE_NAME);
        let mut persistent = true;

        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "Session directory unavailable; sessions will not persist");
            persistent = false;
        }

        let sessions = if persistent {
            Self::load(&path)
        } else {
            HashMap::new()
        };
        info!(path = %path.display(), sessions = sessions.len(), persistent, "Session store opened");

        Self {
            path,
            sessions: Mutex::new(sessions),
            persistent: AtomicBool::new(persistent),
        }
    }

    /// Whether mutations are still being written to disk.
    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::Relaxed)
    }

    fn load(path: &Path) -> HashMap<String, Session> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding unreadable session file");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read session file");
                HashMap::new()
            }
        }
    }

    fn flush(&self, sessions: &HashMap<String, Session>) {
        if !self.is_persistent() {
            return;
        }
        let result = serde_json::to_vec_pretty(sessions)
            .map_err(std::io::Error::other)
            .and_then(|bytes| {
                let tmp = self.path.with_extension("json.tmp");
                std::fs::write(&tmp, bytes)?;
                std::fs::rename(&tmp, &self.path)
            });
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Session file write failed; continuing in memory only");
            self.persistent.store(false, Ordering::Relaxed);
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get_or_create(&self, scenario_key: &str) -> String {
        let mut sessions = lock(&self.sessions);
        if let Some(existing) = sessions.get(scenario_key) {
            return existing.id.clone();
        }
        let session = Session::new(scenario_key);
        let id = session.id.clone();
        debug!(scenario_key, session_id = %id, "Creating persisted session");
        sessions.insert(scenario_key.to_string(), session);
        self.flush(&sessions);
        id
    }

    fn clear(&self, scenario_key: &str) {
        let mut sessions = lock(&self.sessions);
        if sessions.remove(scenario_key).is_some() {
            self.flush(&sessions);
        }
    }

    fn session(&self, scenario_key: &str) -> Option<Session> {
        lock(&self.sessions).get(scenario_key).cloned()
    }

    fn record_message(&self, scenario_key: &str) {
        let mut sessions = lock(&self.sessions);
        if let Some(session) = sessions.get_mut(scenario_key) {
            session.message_count += 1;
            self.flush(&sessions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_have_expected_shape_and_differ() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(a.starts_with("session_"));
        let parts: Vec<&str> = a.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), ID_SUFFIX_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let store = MemorySessionStore::new();
        let first = store.get_or_create("hochzeit");
        let second = store.get_or_create("hochzeit");
        assert_eq!(first, second);
    }

    #[test]
    fn test_scenarios_get_independent_sessions() {
        let store = MemorySessionStore::new();
        assert_ne!(store.get_or_create("a"), store.get_or_create("b"));
    }

    #[test]
    fn test_clear_yields_new_id_and_is_idempotent() {
        let store = MemorySessionStore::new();
        let old = store.get_or_create("party");
        store.clear("party");
        store.clear("party");
        assert!(store.session("party").is_none());
        let fresh = store.get_or_create("party");
        assert_ne!(old, fresh);
    }

    #[test]
    fn test_record_message_counts_only_live_sessions() {
        let store = MemorySessionStore::new();
        store.record_message("ghost");
        assert!(store.session("ghost").is_none());

        store.get_or_create("party");
        store.record_message("party");
        store.record_message("party");
        assert_eq!(store.session("party").map(|s| s.message_count), Some(2));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = FileSessionStore::open(dir.path());
            let id = store.get_or_create("umzug");
            store.record_message("umzug");
            id
        };

        let reopened = FileSessionStore::open(dir.path());
        assert!(reopened.is_persistent());
        assert_eq!(reopened.get_or_create("umzug"), id);
        assert_eq!(reopened.session("umzug").unwrap().message_count, 1);
    }

    #[test]
    fn test_file_store_clear_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path());
        let old = store.get_or_create("umzug");
        store.clear("umzug");
        drop(store);

        let reopened = FileSessionStore::open(dir.path());
        assert!(reopened.session("umzug").is_none());
        assert_ne!(reopened.get_or_create("umzug"), old);
    }

    #[test]
    fn test_corrupt_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FileSessionStore::FILE_NAME), "{not json").unwrap();
        let store = FileSessionStore::open(dir.path());
        assert!(store.session("anything").is_none());
        let id = store.get_or_create("anything");
        assert_eq!(store.get_or_create("anything"), id);
    }

    #[test]
    fn test_unusable_location_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the store expects a directory.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let store = FileSessionStore::open(&blocker);
        assert!(!store.is_persistent());
        let id = store.get_or_create("k");
        assert_eq!(store.get_or_create("k"), id);
        store.clear("k");
        assert_ne!(store.get_or_create("k"), id);
    }
}
