//! Database access for reconlab-engine
//!
//! Schema creation lives in `reconlab_common::db`; this module holds the
//! queries the engine runs against it.

pub mod projects;
pub mod settings;
pub mod tasks;

pub use reconlab_common::db::{init_database, init_in_memory_database};
