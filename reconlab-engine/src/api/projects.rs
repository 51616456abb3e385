//! Project API handlers
//!
//! Project setup, task initialization, enrichment start and progress.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::tasks::TaskView;
use crate::db::projects;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    MappingConfig, NewProject, Project, ProjectMode, ProjectProgress, ProjectStatus,
    ReconciliationTask,
};
use crate::services::{self, InitializationSummary, RegistryClient, RegistryLookup};
use crate::AppState;

/// Project as returned by the API (token redacted)
#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: i64,
    pub name: String,
    pub mode: ProjectMode,
    pub status: ProjectStatus,
    pub target_table: String,
    pub source_table: Option<String>,
    pub mapping: MappingConfig,
    pub created_at: DateTime<Utc>,
}

impl From<Project> for ProjectResponse {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            name: project.name,
            mode: project.mode,
            status: project.status,
            target_table: project.target_table,
            source_table: project.source_table,
            mapping: project.mapping.redacted(),
            created_at: project.created_at,
        }
    }
}

/// Columns available for the join key and field map
#[derive(Debug, Serialize)]
pub struct FieldsResponse {
    pub target_columns: Vec<String>,
    /// Source table columns (CSV mode) or common registry fields (API mode)
    pub source_fields: Vec<String>,
}

/// GET /projects/:id/progress response
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub project_id: i64,
    #[serde(flatten)]
    pub progress: ProjectProgress,
    pub enrichment_running: bool,
}

/// POST /projects/:id/enrichment response
#[derive(Debug, Serialize)]
pub struct EnrichmentStartedResponse {
    pub project_id: i64,
    pub pending_lookups: u64,
}

/// POST /projects
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<NewProject>,
) -> ApiResult<(StatusCode, Json<ProjectResponse>)> {
    let project = projects::create_project(&state.db, &request).await?;
    Ok((StatusCode::CREATED, Json(project.into())))
}

/// GET /projects/:id
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<ProjectResponse>> {
    let project = projects::require_project(&state.db, project_id).await?;
    Ok(Json(project.into()))
}

/// DELETE /projects/:id
///
/// Stops the project's enrichment worker, then deletes the project and all
/// of its tasks.
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.supervisor.cancel(project_id).await;

    if !projects::delete_project(&state.db, project_id).await? {
        return Err(ApiError::NotFound(format!("Project not found: {}", project_id)));
    }

    info!(project_id = project_id, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /projects/:id/mapping
///
/// 409 once the project has tasks.
pub async fn update_mapping(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Json(mapping): Json<MappingConfig>,
) -> ApiResult<Json<ProjectResponse>> {
    let project = projects::update_mapping(&state.db, project_id, &mapping).await?;
    Ok(Json(project.into()))
}

/// Advisory status change
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: ProjectStatus,
}

/// PUT /projects/:id/status
pub async fn update_status(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Json<ProjectResponse>> {
    projects::set_status(&state.db, project_id, request.status).await?;
    info!(project_id = project_id, status = %request.status, "Project status updated");

    let project = projects::require_project(&state.db, project_id).await?;
    Ok(Json(project.into()))
}

/// GET /projects/:id/fields
pub async fn get_fields(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<FieldsResponse>> {
    let project = projects::require_project(&state.db, project_id).await?;

    let target_columns = state.tables.columns(&project.target_table)?;
    let source_fields = match (project.mode, project.source_table.as_deref()) {
        (ProjectMode::Csv, Some(source_table)) => state.tables.columns(source_table)?,
        (ProjectMode::Csv, None) => Vec::new(),
        (ProjectMode::Api, _) => RegistryClient::suggested_fields()
            .iter()
            .map(|f| f.to_string())
            .collect(),
    };

    Ok(Json(FieldsResponse {
        target_columns,
        source_fields,
    }))
}

/// POST /projects/:id/initialize
///
/// **Errors:**
/// - 400: join configuration incomplete
/// - 409: project already has tasks
pub async fn initialize(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<InitializationSummary>> {
    let summary = services::initialize_tasks(&state.db, state.tables.as_ref(), project_id).await?;
    Ok(Json(summary))
}

/// POST /projects/:id/enrichment
///
/// Starts the project's supervised enrichment worker and returns immediately.
///
/// **Errors:**
/// - 400: project not in API mode, or no target join key
/// - 409: worker already running for this project
pub async fn start_enrichment(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<EnrichmentStartedResponse>)> {
    let project = projects::require_project(&state.db, project_id).await?;

    if project.mode != ProjectMode::Api {
        return Err(ApiError::BadRequest(format!(
            "Project {} is not in API mode",
            project_id
        )));
    }
    if project.mapping.target_key().is_none() {
        return Err(ApiError::BadRequest(format!(
            "Project {} has no target join key configured",
            project_id
        )));
    }

    let token =
        crate::config::resolve_registry_token(&state.db, Some(&project), &state.config).await?;
    let registry: Arc<dyn RegistryLookup> =
        Arc::new(RegistryClient::new(&state.config.registry, token)?);

    let progress = crate::db::tasks::progress(&state.db, project_id).await?;
    state.supervisor.start(project_id, registry).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnrichmentStartedResponse {
            project_id,
            pending_lookups: progress.awaiting_enrichment,
        }),
    ))
}

/// GET /projects/:id/progress
pub async fn get_progress(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<ProgressResponse>> {
    let progress = services::project_progress(&state.db, project_id).await?;

    Ok(Json(ProgressResponse {
        project_id,
        progress,
        enrichment_running: state.supervisor.is_running(project_id).await,
    }))
}

/// GET /projects/:id/tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<Vec<ReconciliationTask>>> {
    Ok(Json(services::list_tasks(&state.db, project_id).await?))
}

/// GET /projects/:id/tasks/next
///
/// Lowest-id pending task with its field comparison, or `null` when none is
/// left.
pub async fn next_task(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<Option<TaskView>>> {
    let Some(task) = services::next_pending_task(&state.db, project_id).await? else {
        return Ok(Json(None));
    };

    let project = projects::require_project(&state.db, project_id).await?;
    Ok(Json(Some(TaskView::new(task, &project))))
}

/// Build project routes
pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/projects", post(create_project))
        .route("/projects/:id", get(get_project).delete(delete_project))
        .route("/projects/:id/mapping", put(update_mapping))
        .route("/projects/:id/status", put(update_status))
        .route("/projects/:id/fields", get(get_fields))
        .route("/projects/:id/initialize", post(initialize))
        .route("/projects/:id/enrichment", post(start_enrichment))
        .route("/projects/:id/progress", get(get_progress))
        .route("/projects/:id/tasks", get(list_tasks))
        .route("/projects/:id/tasks/next", get(next_task))
}
