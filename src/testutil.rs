//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use crate::auth::{AuthFlow, Components, Reservations};
use crate::cache::MemoryTokenCache;
use crate::clock::ManualClock;
use crate::config::{
    AuthConfig, Config, NodeConfig, PersistenceMode, SecretPolicyKind, WorkerConfig,
};
use crate::queue::RedbQueue;
use crate::storage::{CredentialStore, Database, DatabaseError, InsertError, UserRecord};
use crate::tokens::{PlaintextPolicy, TokenIssuer};
use crate::AppState;

pub const TEST_SECRET_KEY: &[u8] = b"test-signing-secret";

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard. The caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// A clock pinned to a fixed instant.
pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
    ))
}

/// A `UserRecord` whose stored secret is the raw secret (plaintext policy).
pub fn make_user(login_name: &str, secret: &str) -> UserRecord {
    UserRecord {
        created_at: Utc::now(),
        display_name: format!("{login_name} display"),
        id: Uuid::new_v4(),
        login_name: login_name.to_string(),
        secret: secret.to_string(),
    }
}

/// Store, queue, cache and issuer over a temporary directory, with the
/// plaintext policy (fast to run) and a pinned clock.
pub fn test_components() -> (Components, TempDir) {
    test_components_with_clock(test_clock())
}

/// Like [`test_components`], driven by the given clock.
pub fn test_components_with_clock(clock: Arc<ManualClock>) -> (Components, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let components = Components {
        cache: Arc::new(MemoryTokenCache::new(clock.clone())),
        clock: clock.clone(),
        issuer: Arc::new(TokenIssuer::new(TEST_SECRET_KEY, clock)),
        policy: Arc::new(PlaintextPolicy),
        queue: Arc::new(RedbQueue::open(temp_dir.path()).unwrap()),
        reservations: Arc::new(Reservations::new()),
        store: Arc::new(Database::open(temp_dir.path()).unwrap()),
    };
    (components, temp_dir)
}

/// An `AuthFlow` over [`test_components`] in the given mode.
pub fn test_flow(mode: PersistenceMode) -> (AuthFlow, TempDir) {
    let (components, temp_dir) = test_components();
    let settings = AuthConfig {
        persistence_mode: mode,
        ..Default::default()
    };
    (AuthFlow::new(components, settings), temp_dir)
}

/// A full `AppState` over a temporary data directory, plaintext policy.
pub fn test_state(clock: Arc<ManualClock>) -> (Arc<AppState>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        auth: AuthConfig {
            secret_policy: SecretPolicyKind::Plaintext,
            ..Default::default()
        },
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: temp_dir.path().to_string_lossy().into_owned(),
        },
        secret_key: "test-signing-secret".to_string(),
        worker: WorkerConfig::default(),
    };
    let state = AppState::open_with_clock(config, clock).unwrap();
    (Arc::new(state), temp_dir)
}

/// A store whose writes always fail.
pub struct FailingStore;

impl CredentialStore for FailingStore {
    fn find_by_login_name(&self, _login_name: &str) -> Result<Option<UserRecord>, DatabaseError> {
        Ok(None)
    }

    fn insert(&self, _record: &UserRecord) -> Result<(), InsertError> {
        Err(InsertError::Database(DatabaseError::Io(std::io::Error::other(
            "store offline",
        ))))
    }
}

/// Wraps a store and counts lookups.
pub struct CountingStore {
    inner: Arc<dyn CredentialStore>,
    lookups: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn CredentialStore>) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl CredentialStore for CountingStore {
    fn find_by_login_name(&self, login_name: &str) -> Result<Option<UserRecord>, DatabaseError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_login_name(login_name)
    }

    fn insert(&self, record: &UserRecord) -> Result<(), InsertError> {
        self.inner.insert(record)
    }
}
