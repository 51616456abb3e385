//! Project database operations

use chrono::{DateTime, Utc};
use reconlab_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{MappingConfig, NewProject, Project, ProjectStatus};

/// Insert a validated project, returning it with its id
pub async fn create_project(pool: &SqlitePool, new_project: &NewProject) -> Result<Project> {
    new_project.validate()?;

    let mapping = serde_json::to_string(&new_project.mapping)?;
    let created_at = Utc::now();
    let status = ProjectStatus::Mapping;

    let id = sqlx::query(
        r#"
        INSERT INTO projects (name, mode, status, target_table, source_table, mapping_config, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new_project.name.trim())
    .bind(new_project.mode.as_str())
    .bind(status.as_str())
    .bind(new_project.target_table.trim())
    .bind(new_project.source_table.as_deref().map(str::trim))
    .bind(&mapping)
    .bind(created_at.to_rfc3339())
    .execute(pool)
    .await?
    .last_insert_rowid();

    tracing::info!(project_id = id, mode = new_project.mode.as_str(), "Project created");

    Ok(Project {
        id,
        name: new_project.name.trim().to_string(),
        mode: new_project.mode,
        status,
        target_table: new_project.target_table.trim().to_string(),
        source_table: new_project.source_table.as_deref().map(|s| s.trim().to_string()),
        mapping: new_project.mapping.clone(),
        created_at,
    })
}

/// Load project by id
pub async fn load_project(pool: &SqlitePool, project_id: i64) -> Result<Option<Project>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, mode, status, target_table, source_table, mapping_config, created_at
        FROM projects
        WHERE id = ?
        "#,
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(project_from_row).transpose()
}

/// Load project by id, `NotFound` if missing
pub async fn require_project(pool: &SqlitePool, project_id: i64) -> Result<Project> {
    load_project(pool, project_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Project not found: {}", project_id)))
}

/// Replace a project's mapping configuration
///
/// Rejected once tasks exist: configuration is resolved at initialization
/// and never reapplied to existing tasks.
pub async fn update_mapping(
    pool: &SqlitePool,
    project_id: i64,
    mapping: &MappingConfig,
) -> Result<Project> {
    let mut project = require_project(pool, project_id).await?;

    let task_count = crate::db::tasks::count_tasks(pool, project_id).await?;
    if task_count > 0 {
        return Err(Error::Conflict(format!(
            "Project {} already has {} tasks; mapping is fixed",
            project_id, task_count
        )));
    }

    let mapping_json = serde_json::to_string(mapping)?;
    sqlx::query("UPDATE projects SET mapping_config = ? WHERE id = ?")
        .bind(&mapping_json)
        .bind(project_id)
        .execute(pool)
        .await?;

    project.mapping = mapping.clone();
    Ok(project)
}

/// Set advisory project status
pub async fn set_status(pool: &SqlitePool, project_id: i64, status: ProjectStatus) -> Result<()> {
    let affected = sqlx::query("UPDATE projects SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(project_id)
        .execute(pool)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(Error::NotFound(format!("Project not found: {}", project_id)));
    }
    Ok(())
}

/// Delete a project together with all of its tasks
pub async fn delete_project(pool: &SqlitePool, project_id: i64) -> Result<bool> {
    let affected = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(project_id)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(affected > 0)
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    let mode: String = row.get("mode");
    let status: String = row.get("status");
    let mapping: String = row.get("mapping_config");
    let created_at: String = row.get("created_at");

    Ok(Project {
        id: row.get("id"),
        name: row.get("name"),
        mode: mode.parse()?,
        status: status.parse()?,
        target_table: row.get("target_table"),
        source_table: row.get("source_table"),
        mapping: serde_json::from_str(&mapping)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
            .with_timezone(&Utc),
    })
}
