//! Configuration resolution for reconlab-engine
//!
//! Registry token resolution with Project → Database → ENV → TOML priority,
//! plus worker throughput settings.

use reconlab_common::config::{TomlConfig, WorkerSettings};
use reconlab_common::Result;
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tracing::{info, warn};

use crate::models::Project;

/// Environment variable carrying the registry API token
pub const REGISTRY_TOKEN_ENV: &str = "RECONLAB_REGISTRY_TOKEN";

/// Resolve the registry API token
///
/// **Priority:** project mapping → database → ENV → TOML
///
/// Without a project the first tier is skipped. Returns `None` when no source
/// holds a usable token; lookups then go out unauthenticated.
pub async fn resolve_registry_token(
    db: &Pool<Sqlite>,
    project: Option<&Project>,
    toml_config: &TomlConfig,
) -> Result<Option<String>> {
    let project_id = project.map(|p| p.id);
    let project_token = project.and_then(|p| p.mapping.api_token.clone());
    let db_token = crate::db::settings::get_registry_api_token(db).await?;
    let env_token = std::env::var(REGISTRY_TOKEN_ENV).ok();
    let toml_token = toml_config.registry.api_token.clone();

    let tiers = [
        ("project", project_token),
        ("database", db_token),
        ("environment", env_token),
        ("TOML", toml_token),
    ];

    let sources: Vec<&str> = tiers
        .iter()
        .filter(|(_, token)| token.as_deref().is_some_and(is_valid_key))
        .map(|(source, _)| *source)
        .collect();

    // Warn if multiple sources (potential misconfiguration)
    if sources.len() > 1 {
        warn!(
            ?project_id,
            "Registry token found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    for (source, token) in tiers {
        if let Some(token) = token.filter(|t| is_valid_key(t)) {
            info!(?project_id, "Registry token loaded from {}", source);
            return Ok(Some(token));
        }
    }

    warn!(?project_id, "No registry token configured; lookups are unauthenticated");
    Ok(None)
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Enrichment worker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Chunk size of the selected task list; progress is logged per chunk
    pub batch_size: usize,
    /// Minimum spacing between two outbound registry requests
    pub request_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&WorkerSettings::default())
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            request_interval: Duration::from_millis(settings.request_interval_ms),
        }
    }
}
