//! Settings API endpoint
//!
//! `PUT /settings/registry_token` stores the service-wide registry token in
//! the database tier of token resolution.

use crate::{ApiError, ApiResult, AppState};
use axum::{extract::State, http::StatusCode, routing::put, Json, Router};
use serde::Deserialize;
use tracing::info;

/// Request payload for setting the registry token
#[derive(Debug, Deserialize)]
pub struct SetRegistryTokenRequest {
    pub token: String,
}

/// PUT /settings/registry_token
///
/// **Errors:**
/// - 400 Bad Request: empty or whitespace-only token
pub async fn set_registry_token(
    State(state): State<AppState>,
    Json(payload): Json<SetRegistryTokenRequest>,
) -> ApiResult<StatusCode> {
    if !crate::config::is_valid_key(&payload.token) {
        return Err(ApiError::BadRequest(
            "Registry token cannot be empty or whitespace-only".to_string(),
        ));
    }

    crate::db::settings::set_registry_api_token(&state.db, payload.token.trim().to_string())
        .await?;

    info!("Registry token configured via API");
    Ok(StatusCode::NO_CONTENT)
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/settings/registry_token", put(set_registry_token))
}
