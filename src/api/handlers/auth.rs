use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, Envelope, INVALID_TOKEN};
use crate::auth::{Credentials, Registration};
use crate::tokens::TokenKind;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Deserialize, Serialize)]
pub struct RegisterRequest {
    #[serde(alias = "display_name")]
    pub name: String,
    #[serde(alias = "secret")]
    pub password: String,
    #[serde(alias = "login_name")]
    pub user_name: String,
}

#[derive(Deserialize, Serialize)]
pub struct LoginRequest {
    #[serde(alias = "secret")]
    pub password: String,
    #[serde(alias = "login_name")]
    pub user_name: String,
}

// Request bodies carry secrets; never let them reach a log line.
impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .field("user_name", &self.user_name)
            .finish()
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("password", &"<redacted>")
            .field("user_name", &self.user_name)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyTokenResponse {
    pub expires_at: String,
    pub issued_at: String,
    pub token_type: TokenKind,
    pub user_id: String,
    pub user_name: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn register(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<Envelope<TokenResponse>>), ApiError> {
    let issued = state
        .flow
        .register(Registration {
            display_name: req.name,
            login_name: req.user_name,
            secret: req.password,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Envelope::success(TokenResponse {
            token: issued.token,
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<Json<Envelope<TokenResponse>>, ApiError> {
    let outcome = state
        .flow
        .login(Credentials {
            login_name: req.user_name,
            secret: req.password,
        })
        .await?;

    Ok(Envelope::success(TokenResponse {
        token: outcome.token,
    }))
}

pub async fn verify_token(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<VerifyTokenRequest>,
) -> Result<Json<Envelope<VerifyTokenResponse>>, ApiError> {
    match state.flow.verify(&req.token) {
        Ok(claims) => Ok(Envelope::success(VerifyTokenResponse {
            expires_at: claims.expires_at().to_rfc3339(),
            issued_at: claims.issued_at().to_rfc3339(),
            token_type: claims.token_type,
            user_id: claims.user_id.to_string(),
            user_name: claims.user_name,
        })),
        Err(e) => {
            tracing::debug!(error = %e, "Token rejected");
            Err(ApiError::unauthorized(INVALID_TOKEN))
        }
    }
}
