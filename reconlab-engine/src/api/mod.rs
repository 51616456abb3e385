//! HTTP API handlers for reconlab-engine
//!
//! JSON endpoints used by external orchestration and review surfaces.

pub mod health;
pub mod projects;
pub mod settings;
pub mod tasks;

pub use health::health_routes;
pub use projects::project_routes;
pub use settings::settings_routes;
pub use tasks::task_routes;
