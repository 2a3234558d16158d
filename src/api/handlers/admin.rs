use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, Envelope};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub mode: String,
    /// Registrations queued but not yet durable
    pub pending: u64,
    pub status: String,
}

pub async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Envelope<HealthResponse>>, ApiError> {
    let pending = state
        .flow
        .components()
        .queue
        .pending_len()
        .map_err(|e| {
            tracing::error!(error = %e, "Health check could not read the write queue");
            ApiError::internal("Write queue unavailable")
        })?;

    Ok(Envelope::success(HealthResponse {
        mode: state.flow.mode().as_str().to_string(),
        pending,
        status: "healthy".to_string(),
    }))
}
