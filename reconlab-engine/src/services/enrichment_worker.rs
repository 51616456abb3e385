//! Enrichment worker
//!
//! Fills in the candidate of every unattempted task of an API-mode project,
//! one registry lookup at a time, in task order. Each result is persisted
//! before the next lookup so partial progress survives a crash.
//!
//! Lookup outcomes:
//! - `Found` stores the record, `NotFound` stores an explicit no-match.
//! - `RateLimited(n)` pauses all lookups for `n` seconds, then retries the
//!   same task.
//! - `TransportError` leaves the task unattempted for a later run.
//!
//! None of these abort the run.

use governor::{Quota, RateLimiter};
use reconlab_common::{Error, FlatRecord, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::db::{projects, tasks};
use crate::models::{CandidateState, ProjectMode, ReconciliationTask};
use crate::services::registry_client::{LookupOutcome, RegistryLookup};

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Counters from one worker run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentReport {
    /// Unattempted tasks selected at start
    pub selected: usize,
    pub found: usize,
    pub not_found: usize,
    /// Tasks whose target record lacks the lookup identifier
    pub skipped_missing_key: usize,
    pub transport_errors: usize,
    /// Throttling responses received (each one retried)
    pub rate_limited: usize,
    /// Lookup results that could not be written
    pub persist_failures: usize,
    /// Run stopped by cancellation before the selection was exhausted
    pub cancelled: bool,
}

/// Lookup identifier from a target record
///
/// Strings are trimmed; numbers and booleans are stringified. Null, blank and
/// compound values yield `None`.
pub fn extract_lookup_id(target_data: &FlatRecord, key: &str) -> Option<String> {
    match target_data.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

enum TaskStep {
    Done,
    Cancelled,
}

/// Registry enrichment for one project
pub struct EnrichmentWorker {
    db: SqlitePool,
    registry: Arc<dyn RegistryLookup>,
    config: WorkerConfig,
    cancel: CancellationToken,
    limiter: Option<DirectRateLimiter>,
}

impl EnrichmentWorker {
    pub fn new(db: SqlitePool, registry: Arc<dyn RegistryLookup>, mut config: WorkerConfig) -> Self {
        config.batch_size = config.batch_size.max(1);
        // A zero interval disables pacing
        let limiter = Quota::with_period(config.request_interval).map(RateLimiter::direct);

        Self {
            db,
            registry,
            config,
            cancel: CancellationToken::new(),
            limiter,
        }
    }

    /// Stop the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Enrich every unattempted task of a project
    ///
    /// Fails only on preconditions (unknown project, wrong mode, missing
    /// target key) or if the selection query itself fails.
    pub async fn run(&self, project_id: i64) -> Result<EnrichmentReport> {
        let project = projects::require_project(&self.db, project_id).await?;

        if project.mode != ProjectMode::Api {
            return Err(Error::Config(format!(
                "Project {} is not in API mode",
                project_id
            )));
        }
        let key = project
            .mapping
            .target_key()
            .ok_or_else(|| {
                Error::Config(format!(
                    "Project {} has no target join key configured",
                    project_id
                ))
            })?
            .to_string();

        let selected = tasks::select_unattempted(&self.db, project_id).await?;
        let mut report = EnrichmentReport {
            selected: selected.len(),
            ..Default::default()
        };

        info!(
            project_id = project_id,
            tasks = selected.len(),
            batch_size = self.config.batch_size,
            "Starting enrichment"
        );

        let batch_count = selected.len().div_ceil(self.config.batch_size);
        for (batch_index, batch) in selected.chunks(self.config.batch_size).enumerate() {
            for task in batch {
                if let TaskStep::Cancelled = self.enrich_task(task, &key, &mut report).await {
                    report.cancelled = true;
                    info!(project_id = project_id, ?report, "Enrichment cancelled");
                    return Ok(report);
                }
            }

            debug!(
                project_id = project_id,
                batch = batch_index + 1,
                batches = batch_count,
                "Enrichment batch complete"
            );
        }

        info!(project_id = project_id, ?report, "Enrichment finished");
        Ok(report)
    }

    async fn enrich_task(
        &self,
        task: &ReconciliationTask,
        key: &str,
        report: &mut EnrichmentReport,
    ) -> TaskStep {
        let Some(identifier) = extract_lookup_id(&task.target_data, key) else {
            debug!(task_id = task.id, key = %key, "Lookup identifier missing, skipping");
            report.skipped_missing_key += 1;
            return TaskStep::Done;
        };

        loop {
            if !self.pace().await {
                return TaskStep::Cancelled;
            }

            match self.registry.fetch(&identifier).await {
                LookupOutcome::Found(record) => {
                    report.found += 1;
                    self.persist(task.id, CandidateState::Found(record), report).await;
                    return TaskStep::Done;
                }
                LookupOutcome::NotFound => {
                    report.not_found += 1;
                    self.persist(task.id, CandidateState::NotFound, report).await;
                    return TaskStep::Done;
                }
                LookupOutcome::RateLimited(secs) => {
                    report.rate_limited += 1;
                    warn!(
                        task_id = task.id,
                        retry_after_secs = secs,
                        "Registry throttling, pausing enrichment"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return TaskStep::Cancelled,
                        _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                    }
                }
                LookupOutcome::TransportError(message) => {
                    report.transport_errors += 1;
                    warn!(
                        task_id = task.id,
                        identifier = %identifier,
                        error = %message,
                        "Registry lookup failed, task left for a later run"
                    );
                    return TaskStep::Done;
                }
            }
        }
    }

    /// Wait for the next request slot; false if cancelled first
    async fn pace(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let Some(limiter) = &self.limiter else {
            return true;
        };

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = limiter.until_ready() => true,
        }
    }

    async fn persist(&self, task_id: i64, candidate: CandidateState, report: &mut EnrichmentReport) {
        if let Err(e) = tasks::set_candidate(&self.db, task_id, &candidate).await {
            error!(task_id = task_id, error = %e, "Failed to persist lookup result");
            report.persist_failures += 1;
        }
    }
}
