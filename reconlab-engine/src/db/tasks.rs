//! Task database operations
//!
//! Each mutation is a single-row UPDATE by task id. The enrichment worker
//! writes only the candidate columns; resolution writes only status,
//! decision and final_data.

use reconlab_common::{Error, FlatRecord, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::models::{CandidateState, NewTask, ProjectProgress, ReconciliationTask, TaskStatus};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const TASK_COLUMNS: &str =
    "id, project_id, target_data, candidate_state, candidate_data, status, decision, final_data";

/// Insert tasks on an open connection (typically inside the initializer's transaction)
pub async fn insert_tasks(
    conn: &mut SqliteConnection,
    project_id: i64,
    tasks: &[NewTask],
) -> Result<()> {
    let created_at = chrono::Utc::now().to_rfc3339();

    for task in tasks {
        if task.target_data.is_empty() {
            return Err(Error::InvalidInput(
                "Task target record must not be empty".to_string(),
            ));
        }

        let target_data = serde_json::to_string(&task.target_data)?;
        let candidate_data = task.candidate.data_column()?;

        sqlx::query(
            r#"
            INSERT INTO tasks (project_id, target_data, candidate_state, candidate_data, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(project_id)
        .bind(&target_data)
        .bind(task.candidate.state_label())
        .bind(&candidate_data)
        .bind(TaskStatus::Pending.as_str())
        .bind(&created_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Number of tasks belonging to a project
pub async fn count_tasks(pool: &SqlitePool, project_id: i64) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE project_id = ?")
        .bind(project_id)
        .fetch_one(pool)
        .await?;

    Ok(count as u64)
}

/// Load task by id
pub async fn load_task(pool: &SqlitePool, task_id: i64) -> Result<Option<ReconciliationTask>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
    let row = sqlx::query(&sql).bind(task_id).fetch_optional(pool).await?;

    row.as_ref().map(task_from_row).transpose()
}

/// Load task by id, `NotFound` if missing
pub async fn require_task(pool: &SqlitePool, task_id: i64) -> Result<ReconciliationTask> {
    load_task(pool, task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Task not found: {}", task_id)))
}

/// All tasks of a project in creation order
pub async fn list_tasks(pool: &SqlitePool, project_id: i64) -> Result<Vec<ReconciliationTask>> {
    let sql = format!(
        "SELECT {} FROM tasks WHERE project_id = ? ORDER BY id",
        TASK_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(project_id).fetch_all(pool).await?;

    rows.iter().map(task_from_row).collect()
}

/// Tasks whose candidate has not been looked up yet, in creation order
///
/// Also matches rows still carrying the legacy literal `null` payload.
pub async fn select_unattempted(
    pool: &SqlitePool,
    project_id: i64,
) -> Result<Vec<ReconciliationTask>> {
    let sql = format!(
        r#"
        SELECT {}
        FROM tasks
        WHERE project_id = ?
          AND (candidate_state = ? OR TRIM(candidate_data) = 'null')
        ORDER BY id
        "#,
        TASK_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(project_id)
        .bind(CandidateState::UNATTEMPTED)
        .fetch_all(pool)
        .await?;

    rows.iter().map(task_from_row).collect()
}

/// Record a lookup result on one task
pub async fn set_candidate(
    pool: &SqlitePool,
    task_id: i64,
    candidate: &CandidateState,
) -> Result<()> {
    let state = candidate.state_label();
    let data = candidate.data_column()?;

    retry_on_lock("set_candidate", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query("UPDATE tasks SET candidate_state = ?, candidate_data = ? WHERE id = ?")
            .bind(state)
            .bind(&data)
            .bind(task_id)
            .execute(pool)
            .await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Write review outcome on one task
///
/// Returns false if the task does not exist.
pub async fn save_review(
    pool: &SqlitePool,
    task_id: i64,
    status: TaskStatus,
    decision: Option<&str>,
    final_data: Option<&FlatRecord>,
) -> Result<bool> {
    let final_json = final_data.map(serde_json::to_string).transpose()?;

    retry_on_lock("save_review", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let affected = sqlx::query(
            "UPDATE tasks SET status = ?, decision = ?, final_data = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(decision)
        .bind(&final_json)
        .bind(task_id)
        .execute(pool)
        .await?
        .rows_affected();
        Ok::<_, Error>(affected > 0)
    })
    .await
}

/// Lowest-id pending task of a project
pub async fn next_pending(pool: &SqlitePool, project_id: i64) -> Result<Option<ReconciliationTask>> {
    let sql = format!(
        "SELECT {} FROM tasks WHERE project_id = ? AND status = ? ORDER BY id LIMIT 1",
        TASK_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(project_id)
        .bind(TaskStatus::Pending.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(task_from_row).transpose()
}

/// Review counters for a project
pub async fn progress(pool: &SqlitePool, project_id: i64) -> Result<ProjectProgress> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN status = 'Pending' THEN 1 ELSE 0 END), 0) AS pending,
            COALESCE(SUM(CASE WHEN status = 'Resolved' THEN 1 ELSE 0 END), 0) AS resolved,
            COALESCE(SUM(CASE WHEN status = 'Skipped' THEN 1 ELSE 0 END), 0) AS skipped,
            COALESCE(SUM(CASE WHEN status = 'Pending'
                AND (candidate_state = 'unattempted' OR TRIM(candidate_data) = 'null')
                THEN 1 ELSE 0 END), 0) AS awaiting_enrichment
        FROM tasks
        WHERE project_id = ?
        "#,
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?;

    Ok(ProjectProgress {
        total: row.get::<i64, _>("total") as u64,
        pending: row.get::<i64, _>("pending") as u64,
        resolved: row.get::<i64, _>("resolved") as u64,
        skipped: row.get::<i64, _>("skipped") as u64,
        awaiting_enrichment: row.get::<i64, _>("awaiting_enrichment") as u64,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<ReconciliationTask> {
    let target_data: String = row.get("target_data");
    let candidate_state: String = row.get("candidate_state");
    let candidate_data: Option<String> = row.get("candidate_data");
    let status: String = row.get("status");
    let final_data: Option<String> = row.get("final_data");

    Ok(ReconciliationTask {
        id: row.get("id"),
        project_id: row.get("project_id"),
        target_data: serde_json::from_str(&target_data)?,
        candidate: CandidateState::from_columns(&candidate_state, candidate_data.as_deref())?,
        status: status.parse()?,
        decision: row.get("decision"),
        final_data: final_data
            .as_deref()
            .map(serde_json::from_str::<FlatRecord>)
            .transpose()?,
    })
}
