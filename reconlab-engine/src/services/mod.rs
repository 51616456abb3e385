//! Reconciliation services
//!
//! Task initialization, registry enrichment and resolution, plus the tabular
//! and registry collaborators they read from.

pub mod enrichment_worker;
pub mod registry_client;
pub mod resolution;
pub mod tabular;
pub mod task_initializer;
pub mod worker_supervisor;

pub use enrichment_worker::{extract_lookup_id, EnrichmentReport, EnrichmentWorker};
pub use registry_client::{LookupOutcome, RegistryClient, RegistryLookup};
pub use resolution::{
    derive_final_record, diff_fields, list_tasks, next_pending_task, project_progress,
    resolve_task, skip_task, FieldDiff,
};
pub use tabular::{CsvDirectory, JoinedRow, MemoryTables, TabularSource};
pub use task_initializer::{initialize_tasks, plan_tasks, InitializationSummary};
pub use worker_supervisor::WorkerSupervisor;
