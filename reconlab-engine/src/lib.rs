//! reconlab-engine library interface
//!
//! Task generation, registry enrichment and resolution for two-sided record
//! reconciliation, plus the HTTP router exposing them.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use reconlab_common::config::TomlConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::WorkerConfig;
use crate::services::{TabularSource, WorkerSupervisor};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Tables that projects read their target and source rows from
    pub tables: Arc<dyn TabularSource>,
    /// One enrichment worker per project
    pub supervisor: WorkerSupervisor,
    /// Bootstrap configuration (registry settings, TOML token tier)
    pub config: Arc<TomlConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, tables: Arc<dyn TabularSource>, config: TomlConfig) -> Self {
        let supervisor = WorkerSupervisor::new(db.clone(), WorkerConfig::from(&config.worker));

        Self {
            db,
            tables,
            supervisor,
            config: Arc::new(config),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::project_routes())
        .merge(api::task_routes())
        .merge(api::settings_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
