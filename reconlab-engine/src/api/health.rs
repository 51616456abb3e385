//! Health check endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::services::RegistryClient;
use crate::{ApiResult, AppState};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("reconlab-engine")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "reconlab-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
    })
}

/// Registry reachability response
#[derive(Debug, Serialize)]
pub struct RegistryStatusResponse {
    pub base_url: String,
    pub reachable: bool,
}

/// GET /registry/status
///
/// Probes the registry with the service-wide token (database, environment or
/// TOML; project tokens are not consulted).
pub async fn registry_status(
    State(state): State<AppState>,
) -> ApiResult<Json<RegistryStatusResponse>> {
    let token = crate::config::resolve_registry_token(&state.db, None, &state.config).await?;
    let client = RegistryClient::new(&state.config.registry, token)?;

    Ok(Json(RegistryStatusResponse {
        base_url: state.config.registry.base_url.clone(),
        reachable: client.check_connection().await,
    }))
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/registry/status", get(registry_status))
}
