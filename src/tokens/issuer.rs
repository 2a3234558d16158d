use std::sync::Arc;
use std::time::Duration;

use chrono::SubsecRound;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use super::claims::{Claims, TokenKind};
use crate::cache::CachedToken;
use crate::clock::Clock;
use crate::storage::UserRecord;

/// Lifetime of every issued token
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
    #[error("Invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
    #[error("Token expired")]
    Expired,
}

/// A signed token together with the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub claims: Claims,
    pub token: String,
}

impl IssuedToken {
    pub fn to_cached(&self) -> CachedToken {
        CachedToken {
            token: self.token.clone(),
            token_expires_at: self.claims.expires_at(),
        }
    }
}

/// Signs and verifies HS256 session tokens with the process-wide secret.
pub struct TokenIssuer {
    clock: Arc<dyn Clock>,
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock instead
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            clock,
            decoding: DecodingKey::from_secret(secret),
            encoding: EncodingKey::from_secret(secret),
            validation,
        }
    }

    /// Build and sign a token for `record`, expiring [`TOKEN_LIFETIME`] from now.
    pub fn issue(&self, record: &UserRecord) -> Result<IssuedToken, TokenError> {
        let issued_at = self.clock.now().trunc_subsecs(0);
        let claims = Claims {
            exp: issued_at.timestamp() + TOKEN_LIFETIME.as_secs() as i64,
            iat: issued_at.timestamp(),
            token_type: TokenKind::Access,
            user_id: record.id,
            user_name: record.login_name.clone(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(TokenError::Signing)?;

        Ok(IssuedToken { claims, token })
    }

    /// Check the signature and expiry, returning the claims
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(TokenError::Invalid)?
            .claims;

        if claims.is_expired_at(self.clock.now()) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}
