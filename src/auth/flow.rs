use std::sync::{Arc, OnceLock};

use thiserror::Error;
use uuid::Uuid;

use super::reservations::Reservations;
use crate::cache::{TokenCache, Ttl};
use crate::clock::Clock;
use crate::config::{AuthConfig, PersistenceMode};
use crate::queue::{QueueError, WriteQueue};
use crate::storage::{CredentialStore, InsertError, QueuedRegistration, UserRecord};
use crate::tokens::{Claims, IssuedToken, SecretError, SecretPolicy, TokenError, TokenIssuer};

/// Column limit for login and display names
pub const MAX_NAME_LEN: usize = 150;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("Username already exists")]
    NameTaken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<crate::storage::DatabaseError> for FlowError {
    fn from(e: crate::storage::DatabaseError) -> Self {
        FlowError::Unavailable(format!("credential store: {e}"))
    }
}

impl From<QueueError> for FlowError {
    fn from(e: QueueError) -> Self {
        FlowError::Unavailable(format!("write queue: {e}"))
    }
}

impl From<TokenError> for FlowError {
    fn from(e: TokenError) -> Self {
        FlowError::Unavailable(e.to_string())
    }
}

impl From<tokio::task::JoinError> for FlowError {
    fn from(e: tokio::task::JoinError) -> Self {
        FlowError::Unavailable(format!("blocking task failed: {e}"))
    }
}

/// A new-user request
pub struct Registration {
    pub display_name: String,
    pub login_name: String,
    pub secret: String,
}

/// A login request
pub struct Credentials {
    pub login_name: String,
    pub secret: String,
}

/// Where a login's token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Served from the token cache without checking the secret
    Cache,
    /// Secret verified against the credential store, fresh token issued
    Store,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub source: TokenSource,
    pub token: String,
}

/// The collaborators shared by request handlers and the background worker.
/// Built once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct Components {
    pub cache: Arc<dyn TokenCache>,
    pub clock: Arc<dyn Clock>,
    pub issuer: Arc<TokenIssuer>,
    pub policy: Arc<dyn SecretPolicy>,
    pub queue: Arc<dyn WriteQueue>,
    pub reservations: Arc<Reservations>,
    pub store: Arc<dyn CredentialStore>,
}

/// Orchestrates registration and login over the store, queue and cache.
pub struct AuthFlow {
    components: Components,
    settings: AuthConfig,
    /// Stored-form secret checked when a login names an unknown user, so
    /// both failure paths cost the same
    decoy: Arc<OnceLock<String>>,
}

impl AuthFlow {
    pub fn new(components: Components, settings: AuthConfig) -> Self {
        Self {
            components,
            settings,
            decoy: Arc::new(OnceLock::new()),
        }
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub fn mode(&self) -> PersistenceMode {
        self.settings.persistence_mode
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub async fn register(&self, req: Registration) -> Result<IssuedToken, FlowError> {
        validate_registration(&req)?;
        let c = &self.components;

        let id = Uuid::new_v4();
        let login_name = req.login_name.clone();
        let fast = self.settings.persistence_mode == PersistenceMode::Fast;

        // Reserved in both modes, since names restored from the queue at
        // startup are pending whatever mode this process runs in. The worker
        // writes the record before releasing, so one of the two is visible.
        if !c.reservations.reserve(&login_name, id) {
            return Err(FlowError::NameTaken);
        }

        let result = self.create_user(id, req).await;
        // A queued record keeps its reservation until the worker settles it
        if !(fast && result.is_ok()) {
            c.reservations.release(&login_name, id);
        }

        let issued = result?;
        c.cache.set(
            &login_name,
            issued.to_cached(),
            Ttl::from_seconds(self.settings.registration_token_ttl_seconds),
        );
        tracing::debug!(
            login_name = %login_name,
            user_id = %id,
            mode = self.settings.persistence_mode.as_str(),
            "Registered user"
        );
        Ok(issued)
    }

    async fn create_user(&self, id: Uuid, req: Registration) -> Result<IssuedToken, FlowError> {
        let c = &self.components;

        if c.store.find_by_login_name(&req.login_name)?.is_some() {
            return Err(FlowError::NameTaken);
        }

        let policy = Arc::clone(&c.policy);
        let secret = req.secret;
        let stored = tokio::task::spawn_blocking(move || policy.prepare(&secret))
            .await?
            .map_err(|e| FlowError::Unavailable(e.to_string()))?;

        let record = UserRecord {
            created_at: c.clock.now(),
            display_name: req.display_name,
            id,
            login_name: req.login_name,
            secret: stored,
        };

        // Issued before persisting so a signing failure leaves nothing behind
        let issued = c.issuer.issue(&record)?;

        match self.settings.persistence_mode {
            PersistenceMode::Safe => match c.store.insert(&record) {
                Ok(()) => {}
                Err(InsertError::Duplicate { .. }) => return Err(FlowError::NameTaken),
                Err(InsertError::Database(e)) => return Err(e.into()),
            },
            PersistenceMode::Fast => {
                let payload = QueuedRegistration::new(record)
                    .to_payload()
                    .map_err(|e| FlowError::Unavailable(e.to_string()))?;
                c.queue.push(&payload)?;
            }
        }

        Ok(issued)
    }

    // ========================================================================
    // Login
    // ========================================================================

    pub async fn login(&self, req: Credentials) -> Result<LoginOutcome, FlowError> {
        // No stored record has an empty name or secret
        if req.login_name.is_empty() || req.secret.is_empty() {
            return Err(FlowError::InvalidCredentials);
        }
        let c = &self.components;

        // Cached tokens were only ever issued after the secret was accepted,
        // so a hit is served without re-verifying it.
        let cached = if self.settings.consume_cached_tokens {
            c.cache.take(&req.login_name)
        } else {
            c.cache.get(&req.login_name)
        };
        if let Some(cached) = cached {
            tracing::debug!(login_name = %req.login_name, "Login served from token cache");
            return Ok(LoginOutcome {
                source: TokenSource::Cache,
                token: cached.token,
            });
        }

        let record = c.store.find_by_login_name(&req.login_name)?;

        let policy = Arc::clone(&c.policy);
        let decoy = Arc::clone(&self.decoy);
        let stored = record.as_ref().map(|record| record.secret.clone());
        let secret = req.secret;
        let matches = tokio::task::spawn_blocking(move || {
            let stored = match stored {
                Some(stored) => stored,
                None => decoy_secret(&decoy, policy.as_ref())?,
            };
            Ok::<_, SecretError>(policy.verify(&secret, &stored))
        })
        .await?
        .map_err(|e| FlowError::Unavailable(e.to_string()))?;

        let record = match record {
            Some(record) if matches => record,
            _ => return Err(FlowError::InvalidCredentials),
        };

        let issued = c.issuer.issue(&record)?;
        c.cache.set(
            &record.login_name,
            issued.to_cached(),
            Ttl::from_seconds(self.settings.login_token_ttl_seconds),
        );

        tracing::debug!(login_name = %record.login_name, user_id = %record.id, "Login verified");
        Ok(LoginOutcome {
            source: TokenSource::Store,
            token: issued.token,
        })
    }

    /// Check a bearer token's signature and expiry
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.components.issuer.verify(token)
    }

    /// Re-reserve every name still waiting in the queue. Called at startup,
    /// after the queue has recovered leased entries.
    pub fn restore_reservations(&self) -> Result<usize, QueueError> {
        let c = &self.components;
        let mut restored = 0;
        for payload in c.queue.pending()? {
            if let Ok(entry) = QueuedRegistration::from_payload(&payload) {
                if c.reservations.reserve(&entry.record.login_name, entry.record.id) {
                    restored += 1;
                }
            }
        }
        Ok(restored)
    }
}

/// Stored-form secret checked when a login names an unknown user. Prepared
/// once, on a blocking thread.
fn decoy_secret(
    cell: &OnceLock<String>,
    policy: &dyn SecretPolicy,
) -> Result<String, SecretError> {
    if let Some(decoy) = cell.get() {
        return Ok(decoy.clone());
    }
    let decoy = policy.prepare(&Uuid::new_v4().to_string())?;
    Ok(cell.get_or_init(|| decoy).clone())
}

fn validate_registration(req: &Registration) -> Result<(), FlowError> {
    if req.login_name.trim().is_empty() {
        return Err(FlowError::InvalidInput("user_name is required"));
    }
    if req.login_name.chars().count() > MAX_NAME_LEN {
        return Err(FlowError::InvalidInput("user_name is too long"));
    }
    if req.secret.is_empty() {
        return Err(FlowError::InvalidInput("password is required"));
    }
    if req.display_name.trim().is_empty() {
        return Err(FlowError::InvalidInput("name is required"));
    }
    if req.display_name.chars().count() > MAX_NAME_LEN {
        return Err(FlowError::InvalidInput("name is too long"));
    }
    Ok(())
}
