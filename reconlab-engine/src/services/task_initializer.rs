//! Task initializer
//!
//! Produces the initial review tasks of a project, once:
//! - CSV mode joins the target table with the source table on the configured
//!   key pair; unmatched target rows get an explicit `NotFound` candidate.
//! - API mode seeds one `Unattempted` task per target row for the enrichment
//!   worker.
//!
//! All tasks and the project status change are written in one transaction.

use reconlab_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::{projects, tasks};
use crate::models::{CandidateState, NewTask, Project, ProjectMode, ProjectStatus};
use crate::services::tabular::TabularSource;

/// Counts from one initialization run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitializationSummary {
    pub tasks_created: usize,
    /// Tasks with a matched source row (CSV mode)
    pub matched: usize,
    /// Tasks whose target row matched nothing (CSV mode)
    pub unmatched: usize,
    /// Tasks waiting for a registry lookup (API mode)
    pub awaiting_enrichment: usize,
}

/// Build the task set of a project without writing anything
///
/// Fails with `Error::Config` when the join configuration is incomplete or
/// names a column the table does not have.
pub fn plan_tasks(project: &Project, tables: &dyn TabularSource) -> Result<Vec<NewTask>> {
    let target_key = project.mapping.target_key().ok_or_else(|| {
        Error::Config(format!(
            "Project {} has no target join key configured",
            project.id
        ))
    })?;

    match project.mode {
        ProjectMode::Csv => {
            let source_key = project.mapping.source_key().ok_or_else(|| {
                Error::Config(format!(
                    "Project {} has no source join key configured",
                    project.id
                ))
            })?;
            let source_table = project
                .source_table
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| {
                    Error::Config(format!("Project {} has no source table", project.id))
                })?;

            let joined =
                tables.left_join(&project.target_table, source_table, target_key, source_key)?;

            Ok(joined
                .into_iter()
                .map(|row| NewTask {
                    target_data: row.target,
                    candidate: row
                        .source
                        .map(CandidateState::Found)
                        .unwrap_or(CandidateState::NotFound),
                })
                .collect())
        }
        ProjectMode::Api => {
            let columns = tables.columns(&project.target_table)?;
            if !columns.iter().any(|c| c == target_key) {
                return Err(Error::Config(format!(
                    "Join column '{}' not found in table '{}'",
                    target_key, project.target_table
                )));
            }

            Ok(tables
                .rows(&project.target_table)?
                .into_iter()
                .map(|row| NewTask {
                    target_data: row,
                    candidate: CandidateState::Unattempted,
                })
                .collect())
        }
    }
}

/// Create the tasks of a project and move it to `Processing`
///
/// A project that already has tasks is rejected with `Error::Conflict`.
pub async fn initialize_tasks(
    pool: &SqlitePool,
    tables: &dyn TabularSource,
    project_id: i64,
) -> Result<InitializationSummary> {
    let project = projects::require_project(pool, project_id).await?;
    let new_tasks = plan_tasks(&project, tables)?;

    let summary = summarize(&new_tasks);

    let mut tx = pool.begin().await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE project_id = ?")
        .bind(project_id)
        .fetch_one(&mut *tx)
        .await?;
    if existing > 0 {
        return Err(Error::Conflict(format!(
            "Project {} is already initialized ({} tasks)",
            project_id, existing
        )));
    }

    tasks::insert_tasks(&mut *tx, project_id, &new_tasks).await?;

    sqlx::query("UPDATE projects SET status = ? WHERE id = ?")
        .bind(ProjectStatus::Processing.as_str())
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        project_id = project_id,
        mode = project.mode.as_str(),
        tasks = summary.tasks_created,
        matched = summary.matched,
        unmatched = summary.unmatched,
        "Initialized tasks"
    );

    Ok(summary)
}

fn summarize(new_tasks: &[NewTask]) -> InitializationSummary {
    let mut summary = InitializationSummary {
        tasks_created: new_tasks.len(),
        ..Default::default()
    };
    for task in new_tasks {
        match task.candidate {
            CandidateState::Found(_) => summary.matched += 1,
            CandidateState::NotFound => summary.unmatched += 1,
            CandidateState::Unattempted => summary.awaiting_enrichment += 1,
        }
    }
    summary
}
