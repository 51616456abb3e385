//! Task API handlers
//!
//! Single-task read, resolve and skip.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::{projects, tasks};
use crate::error::ApiResult;
use crate::models::{Project, ReconciliationTask, Resolution};
use crate::services::{self, FieldDiff};
use crate::AppState;

/// Task with the comparison of its mapped columns
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: ReconciliationTask,
    pub diff: Vec<FieldDiff>,
}

impl TaskView {
    pub fn new(task: ReconciliationTask, project: &Project) -> Self {
        let diff = services::diff_fields(&task.target_data, &task.candidate, &project.mapping.field_map);
        Self { task, diff }
    }
}

/// GET /tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<TaskView>> {
    let task = tasks::require_task(&state.db, task_id).await?;
    let project = projects::require_project(&state.db, task.project_id).await?;
    Ok(Json(TaskView::new(task, &project)))
}

/// POST /tasks/:id/resolve
///
/// **Request:** `{"decision": "keep_target"}`, `{"decision": "accept_source"}`,
/// `{"decision": "manual_edit", "payload": {...}}` or
/// `{"decision": "confirmed", "payload": {...}}`
pub async fn resolve_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(resolution): Json<Resolution>,
) -> ApiResult<Json<ReconciliationTask>> {
    Ok(Json(services::resolve_task(&state.db, task_id, resolution).await?))
}

/// POST /tasks/:id/skip
pub async fn skip_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<ReconciliationTask>> {
    Ok(Json(services::skip_task(&state.db, task_id).await?))
}

/// Build task routes
pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/resolve", post(resolve_task))
        .route("/tasks/:id/skip", post(skip_task))
}
