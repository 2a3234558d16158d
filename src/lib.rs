//! token-gate - Session token issuance over a write-behind user registry
//!
//! This crate provides user registration and login with:
//! - HS256 session tokens with a fixed 30 minute lifetime
//! - A volatile token cache that short-circuits repeat logins
//! - Two persistence modes: synchronous inserts, or a durable write-behind
//!   queue drained by a single background worker
//! - Pluggable secret handling (argon2 verifier hashes, or opt-in plaintext)
//! - redb embedded storage for users and the queue
//! - REST API

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod expiration;
pub mod queue;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod tokens;

use std::sync::Arc;

use thiserror::Error;

use auth::{AuthFlow, Components, Reservations};
use cache::MemoryTokenCache;
use clock::{Clock, SystemClock};
use config::{Config, SecretPolicyKind};
use queue::{QueueError, RedbQueue, WorkerHandle, WriteBehindWorker, WriteQueue};
use storage::{Database, DatabaseError};
use tokens::{Argon2Policy, PlaintextPolicy, SecretPolicy, TokenIssuer};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to open storage: {0}")]
    Storage(#[from] DatabaseError),
    #[error("Failed to recover write queue: {0}")]
    Queue(#[from] QueueError),
}

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub flow: AuthFlow,
}

impl AppState {
    /// Open storage under the configured data directory, recover the write
    /// queue, and wire the components together.
    pub fn open(config: Config) -> Result<Self, StartupError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self, StartupError> {
        let db = Database::open(&config.node.data_dir)?;
        let queue = RedbQueue::open(&config.node.data_dir)?;

        let recovered = queue.recover()?;
        if recovered > 0 {
            tracing::warn!(
                count = recovered,
                "Redelivering queue entries left in flight by a previous run"
            );
        }

        let policy: Arc<dyn SecretPolicy> = match config.auth.secret_policy {
            SecretPolicyKind::Argon2 => Arc::new(Argon2Policy::default()),
            SecretPolicyKind::Plaintext => Arc::new(PlaintextPolicy),
        };
        tracing::info!(
            secret_policy = policy.name(),
            plaintext = policy.stores_plaintext(),
            "Secret policy selected"
        );

        let components = Components {
            cache: Arc::new(MemoryTokenCache::new(Arc::clone(&clock))),
            issuer: Arc::new(TokenIssuer::new(
                config.secret_key.as_bytes(),
                Arc::clone(&clock),
            )),
            clock,
            policy,
            queue: Arc::new(queue),
            reservations: Arc::new(Reservations::new()),
            store: Arc::new(db),
        };

        let flow = AuthFlow::new(components, config.auth.clone());
        let reserved = flow.restore_reservations()?;
        if reserved > 0 {
            tracing::info!(count = reserved, "Restored reservations for queued users");
        }

        Ok(Self { config, flow })
    }

    /// Start the write-behind worker for this state's queue and store.
    pub fn start_worker(&self) -> WorkerHandle {
        WriteBehindWorker::new(self.flow.components(), &self.config.worker).spawn()
    }
}
