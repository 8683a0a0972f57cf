//! dbvault: backup orchestration for containerized databases.
//!
//! The library holds the engine (catalog store, target registry, backup
//! executor and the orchestration facade) plus the optional HTTP server.
//! The `dbvault` binary adds the command line on top.

pub mod core;
pub mod utils;

#[cfg(feature = "server")]
pub mod server;

pub use crate::core::{ApiError, ApiResult, Orchestrator, Settings};
pub use crate::utils::AppConfig;
