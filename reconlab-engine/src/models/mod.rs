//! Data models for reconlab-engine

pub mod project;
pub mod task;

pub use project::{JoinKey, MappingConfig, NewProject, Project, ProjectMode, ProjectStatus};
pub use task::{
    CandidateState, NewTask, ProjectProgress, ReconciliationTask, Resolution, TaskStatus,
};
