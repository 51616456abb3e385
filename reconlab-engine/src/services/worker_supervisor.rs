//! Worker supervisor
//!
//! Owns at most one enrichment worker per project. Starting a second worker
//! for a project whose worker is still running is a conflict; a finished
//! worker removes itself so the project can be enriched again later.

use reconlab_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::services::enrichment_worker::EnrichmentWorker;
use crate::services::registry_client::RegistryLookup;

struct RunningWorker {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One supervised enrichment worker per project
#[derive(Clone)]
pub struct WorkerSupervisor {
    db: SqlitePool,
    config: WorkerConfig,
    workers: Arc<Mutex<HashMap<i64, RunningWorker>>>,
    shutdown: CancellationToken,
    generation: Arc<AtomicU64>,
}

impl WorkerSupervisor {
    pub fn new(db: SqlitePool, config: WorkerConfig) -> Self {
        Self {
            db,
            config,
            workers: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the enrichment worker of a project
    ///
    /// Returns `Error::Conflict` if that project's worker is still running.
    pub async fn start(&self, project_id: i64, registry: Arc<dyn RegistryLookup>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Conflict("Worker supervisor is shut down".to_string()));
        }

        let mut workers = self.workers.lock().await;

        if let Some(running) = workers.get(&project_id) {
            if !running.handle.is_finished() {
                return Err(Error::Conflict(format!(
                    "Enrichment already running for project {}",
                    project_id
                )));
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let worker = EnrichmentWorker::new(self.db.clone(), registry, self.config.clone())
            .with_cancellation(cancel.clone());
        let registry_map = Arc::clone(&self.workers);

        let handle = tokio::spawn(async move {
            match worker.run(project_id).await {
                Ok(report) => {
                    info!(project_id = project_id, ?report, "Enrichment worker exited")
                }
                Err(e) => {
                    error!(project_id = project_id, error = %e, "Enrichment worker failed")
                }
            }

            let mut workers = registry_map.lock().await;
            if workers
                .get(&project_id)
                .is_some_and(|w| w.generation == generation)
            {
                workers.remove(&project_id);
            }
        });

        workers.insert(
            project_id,
            RunningWorker {
                generation,
                cancel,
                handle,
            },
        );

        info!(project_id = project_id, "Enrichment worker started");
        Ok(())
    }

    /// True while the project's worker has not finished
    pub async fn is_running(&self, project_id: i64) -> bool {
        self.workers
            .lock()
            .await
            .get(&project_id)
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Cancel one project's worker; false if none was running
    pub async fn cancel(&self, project_id: i64) -> bool {
        match self.workers.lock().await.get(&project_id) {
            Some(running) => {
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every worker and wait for all of them to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<(i64, JoinHandle<()>)> = self
            .workers
            .lock()
            .await
            .drain()
            .map(|(project_id, running)| (project_id, running.handle))
            .collect();

        for (project_id, handle) in handles {
            if let Err(e) = handle.await {
                error!(project_id = project_id, error = %e, "Enrichment worker panicked");
            }
        }

        info!("Worker supervisor shut down");
    }
}
