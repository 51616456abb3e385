//! # ReconLab Common Library
//!
//! Shared code for the ReconLab reconciliation service:
//! - Error type used across crates
//! - Configuration loading and root folder resolution
//! - SQLite schema initialization and migrations
//! - Document flattening for registry responses

pub mod config;
pub mod db;
pub mod error;
pub mod flatten;

pub use error::{Error, Result};
pub use flatten::{flatten, FlatRecord};
