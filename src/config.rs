use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub node: NodeConfig,
    /// HMAC secret for signing tokens. Loaded once, never rotated.
    pub secret_key: String,
    pub worker: WorkerConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("auth", &self.auth)
            .field("node", &self.node)
            .field("secret_key", &"<redacted>")
            .field("worker", &self.worker)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
}

/// Where a registration becomes durable before the request returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Insert into the credential store synchronously
    #[default]
    Safe,
    /// Enqueue and let the write-behind worker persist it
    Fast,
}

impl PersistenceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceMode::Safe => "safe",
            PersistenceMode::Fast => "fast",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecretPolicyKind {
    #[default]
    Argon2,
    /// Raw secrets at rest. Refused unless explicitly allowed.
    Plaintext,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Delete a cached token when a login is served from it
    pub consume_cached_tokens: bool,
    pub login_token_ttl_seconds: u64,
    pub persistence_mode: PersistenceMode,
    /// 0 keeps registration tokens cached until consumed
    pub registration_token_ttl_seconds: u64,
    pub secret_policy: SecretPolicyKind,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            consume_cached_tokens: true,
            login_token_ttl_seconds: 1800, // 30 minutes
            persistence_mode: PersistenceMode::Safe,
            registration_token_ttl_seconds: 0,
            secret_policy: SecretPolicyKind::Argon2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub cache_sweep_interval_seconds: u64,
    /// Store failures tolerated before an entry is dead-lettered
    pub max_attempts: u32,
    /// Idle delay when the queue is empty
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_sweep_interval_seconds: 60,
            max_attempts: 5,
            poll_interval_ms: 100,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_key = lookup("SECRET_KEY")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("SECRET_KEY"))?;

        let bind_address = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let data_dir = lookup("DATA_DIR").unwrap_or_else(|| "./data".to_string());

        let persistence_mode = match lookup("PERSISTENCE_MODE") {
            None => PersistenceMode::default(),
            Some(v) => match v.to_lowercase().as_str() {
                "safe" => PersistenceMode::Safe,
                "fast" => PersistenceMode::Fast,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "PERSISTENCE_MODE",
                        value: v,
                    })
                }
            },
        };

        let secret_policy = match lookup("SECRET_POLICY") {
            None => SecretPolicyKind::default(),
            Some(v) => match v.to_lowercase().as_str() {
                "argon2" => SecretPolicyKind::Argon2,
                "plaintext" => SecretPolicyKind::Plaintext,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SECRET_POLICY",
                        value: v,
                    })
                }
            },
        };

        let allow_plaintext = parse_bool(&lookup, "ALLOW_PLAINTEXT_SECRETS")?.unwrap_or(false);

        let defaults = AuthConfig::default();
        let auth = AuthConfig {
            consume_cached_tokens: parse_bool(&lookup, "CONSUME_CACHED_TOKENS")?
                .unwrap_or(defaults.consume_cached_tokens),
            login_token_ttl_seconds: parse_number(&lookup, "LOGIN_TOKEN_TTL_SECONDS")?
                .unwrap_or(defaults.login_token_ttl_seconds),
            persistence_mode,
            registration_token_ttl_seconds: parse_number(
                &lookup,
                "REGISTRATION_TOKEN_TTL_SECONDS",
            )?
            .unwrap_or(defaults.registration_token_ttl_seconds),
            secret_policy,
        };

        let defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            cache_sweep_interval_seconds: parse_number(&lookup, "CACHE_SWEEP_INTERVAL_SECONDS")?
                .unwrap_or(defaults.cache_sweep_interval_seconds),
            max_attempts: parse_number(&lookup, "WORKER_MAX_ATTEMPTS")?
                .unwrap_or(defaults.max_attempts),
            poll_interval_ms: parse_number(&lookup, "WORKER_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval_ms),
        };

        let config = Config {
            auth,
            node: NodeConfig {
                bind_address,
                data_dir,
            },
            secret_key,
            worker,
        };

        config.validate(allow_plaintext)?;
        Ok(config)
    }

    fn validate(&self, allow_plaintext: bool) -> Result<(), ConfigError> {
        if self.auth.secret_policy == SecretPolicyKind::Plaintext {
            if !allow_plaintext {
                return Err(ConfigError::ValidationError(
                    "SECRET_POLICY=plaintext stores raw secrets and requires \
                     ALLOW_PLAINTEXT_SECRETS=true"
                        .to_string(),
                ));
            }
            tracing::warn!(
                "Plaintext secret policy enabled. Secrets are stored and queued unhashed; \
                 never use this outside load testing."
            );
        }

        if self.worker.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "WORKER_POLL_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }
        if self.worker.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "WORKER_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.worker.cache_sweep_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "CACHE_SWEEP_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        if self.auth.persistence_mode == PersistenceMode::Fast {
            tracing::warn!(
                "Fast persistence mode: registrations are acknowledged before they are durable"
            );
        }

        Ok(())
    }

    pub fn is_fast_mode(&self) -> bool {
        self.auth.persistence_mode == PersistenceMode::Fast
    }
}

fn parse_bool<F>(lookup: &F, name: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(v) => match v.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid { name, value: v }),
        },
    }
}

fn parse_number<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(v) => match v.trim().parse() {
            Ok(n) => Ok(Some(n)),
            Err(_) => Err(ConfigError::Invalid { name, value: v }),
        },
    }
}
