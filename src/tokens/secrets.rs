//! How a login secret is turned into what the credential store keeps, and
//! how a presented secret is checked against it.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Failed to hash secret: {0}")]
    Hash(argon2::password_hash::Error),
}

pub trait SecretPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Derive the stored form of `secret`
    fn prepare(&self, secret: &str) -> Result<String, SecretError>;

    fn verify(&self, secret: &str, stored: &str) -> bool;

    /// Whether the stored form is recoverable
    fn stores_plaintext(&self) -> bool {
        false
    }
}

/// Argon2id verifier hashes in PHC string format.
#[derive(Default)]
pub struct Argon2Policy {
    argon2: Argon2<'static>,
}

impl Argon2Policy {
    fn salt() -> Result<SaltString, SecretError> {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        SaltString::encode_b64(&bytes).map_err(SecretError::Hash)
    }
}

impl SecretPolicy for Argon2Policy {
    fn name(&self) -> &'static str {
        "argon2"
    }

    fn prepare(&self, secret: &str) -> Result<String, SecretError> {
        self.argon2
            .hash_password(secret.as_bytes(), &Self::salt()?)
            .map(|hash| hash.to_string())
            .map_err(SecretError::Hash)
    }

    fn verify(&self, secret: &str, stored: &str) -> bool {
        PasswordHash::new(stored)
            .map(|hash| {
                self.argon2
                    .verify_password(secret.as_bytes(), &hash)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}

/// Stores the secret verbatim. Only for load testing; requires explicit
/// opt-in through configuration.
#[derive(Debug, Default)]
pub struct PlaintextPolicy;

impl SecretPolicy for PlaintextPolicy {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn prepare(&self, secret: &str) -> Result<String, SecretError> {
        Ok(secret.to_string())
    }

    fn verify(&self, secret: &str, stored: &str) -> bool {
        secret == stored
    }

    fn stores_plaintext(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argon2_round_trip() {
        let policy = Argon2Policy::default();
        let stored = policy.prepare("secretA").unwrap();

        assert!(stored.starts_with("$argon2"));
        assert!(!stored.contains("secretA"));
        assert!(policy.verify("secretA", &stored));
        assert!(!policy.verify("secretB", &stored));
    }

    #[test]
    fn test_argon2_salts_differ() {
        let policy = Argon2Policy::default();
        assert_ne!(
            policy.prepare("secretA").unwrap(),
            policy.prepare("secretA").unwrap()
        );
    }

    #[test]
    fn test_argon2_rejects_garbage_stored_value() {
        let policy = Argon2Policy::default();
        assert!(!policy.verify("secretA", "secretA"));
        assert!(!policy.verify("secretA", ""));
    }

    #[test]
    fn test_plaintext_policy() {
        let policy = PlaintextPolicy;
        let stored = policy.prepare("secretA").unwrap();

        assert_eq!(stored, "secretA");
        assert!(policy.verify("secretA", &stored));
        assert!(!policy.verify("secreta", &stored));
        assert!(policy.stores_plaintext());
        assert!(!Argon2Policy::default().stores_plaintext());
    }
}
