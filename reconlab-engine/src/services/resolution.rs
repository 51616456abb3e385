//! Resolution engine
//!
//! Derives the golden record of a task from a decision and advances the task
//! to `Resolved` (or `Skipped`). Resolving again overwrites the previous
//! decision and golden record.

use reconlab_common::{Error, FlatRecord, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::info;

use crate::db::{projects, tasks};
use crate::models::{CandidateState, ProjectProgress, ReconciliationTask, Resolution, TaskStatus};

/// Golden record for a decision
///
/// `KeepTarget` never looks at the candidate. `AcceptSource` copies the target
/// and overrides each mapped column whose source field the candidate carries.
pub fn derive_final_record(
    target_data: &FlatRecord,
    candidate: &CandidateState,
    field_map: &BTreeMap<String, String>,
    resolution: &Resolution,
) -> FlatRecord {
    match resolution {
        Resolution::KeepTarget => target_data.clone(),
        Resolution::AcceptSource => {
            let mut merged = target_data.clone();
            if let Some(source) = candidate.record() {
                for (target_column, source_field) in field_map {
                    if let Some(value) = source.get(source_field) {
                        merged.insert(target_column.clone(), value.clone());
                    }
                }
            }
            merged
        }
        Resolution::ManualEdit(payload) | Resolution::Confirmed(payload) => payload.clone(),
    }
}

/// Apply a decision to a task
pub async fn resolve_task(
    pool: &SqlitePool,
    task_id: i64,
    resolution: Resolution,
) -> Result<ReconciliationTask> {
    if let Resolution::ManualEdit(payload) | Resolution::Confirmed(payload) = &resolution {
        if payload.is_empty() {
            return Err(Error::InvalidInput(format!(
                "{} requires a non-empty record",
                resolution.label()
            )));
        }
    }

    let mut task = tasks::require_task(pool, task_id).await?;

    let field_map = match resolution {
        Resolution::AcceptSource => projects::require_project(pool, task.project_id)
            .await?
            .mapping
            .field_map,
        _ => BTreeMap::new(),
    };

    let final_data = derive_final_record(&task.target_data, &task.candidate, &field_map, &resolution);
    let label = resolution.label();

    if !tasks::save_review(pool, task_id, TaskStatus::Resolved, Some(label), Some(&final_data)).await? {
        return Err(Error::NotFound(format!("Task not found: {}", task_id)));
    }

    info!(task_id = task_id, project_id = task.project_id, decision = label, "Task resolved");

    task.status = TaskStatus::Resolved;
    task.decision = Some(label.to_string());
    task.final_data = Some(final_data);
    Ok(task)
}

/// Set a task aside without a golden record
pub async fn skip_task(pool: &SqlitePool, task_id: i64) -> Result<ReconciliationTask> {
    let mut task = tasks::require_task(pool, task_id).await?;

    if !tasks::save_review(pool, task_id, TaskStatus::Skipped, None, None).await? {
        return Err(Error::NotFound(format!("Task not found: {}", task_id)));
    }

    info!(task_id = task_id, project_id = task.project_id, "Task skipped");

    task.status = TaskStatus::Skipped;
    task.decision = None;
    task.final_data = None;
    Ok(task)
}

/// Lowest-id pending task of a project, if any
pub async fn next_pending_task(
    pool: &SqlitePool,
    project_id: i64,
) -> Result<Option<ReconciliationTask>> {
    projects::require_project(pool, project_id).await?;
    tasks::next_pending(pool, project_id).await
}

/// Review counters of a project
pub async fn project_progress(pool: &SqlitePool, project_id: i64) -> Result<ProjectProgress> {
    projects::require_project(pool, project_id).await?;
    tasks::progress(pool, project_id).await
}

/// All tasks of a project, for export
pub async fn list_tasks(pool: &SqlitePool, project_id: i64) -> Result<Vec<ReconciliationTask>> {
    projects::require_project(pool, project_id).await?;
    tasks::list_tasks(pool, project_id).await
}

/// Comparison of one mapped column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub target_column: String,
    pub source_field: String,
    pub target_value: Option<Value>,
    pub source_value: Option<Value>,
    pub differs: bool,
}

/// Side-by-side view of the mapped columns of a task
///
/// Values are compared by their text form, so `"75001"` and `75001` agree.
/// Empty when the task has no matched candidate.
pub fn diff_fields(
    target_data: &FlatRecord,
    candidate: &CandidateState,
    field_map: &BTreeMap<String, String>,
) -> Vec<FieldDiff> {
    let Some(source) = candidate.record() else {
        return Vec::new();
    };

    field_map
        .iter()
        .map(|(target_column, source_field)| {
            let target_value = target_data.get(target_column).cloned();
            let source_value = source.get(source_field).cloned();
            let differs = text_form(target_value.as_ref()) != text_form(source_value.as_ref());
            FieldDiff {
                target_column: target_column.clone(),
                source_field: source_field.clone(),
                target_value,
                source_value,
                differs,
            }
        })
        .collect()
}

fn text_form(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
