pub mod error;
pub mod engine;
pub mod catalog;
pub mod registry;
pub mod executor;
pub mod facade;

pub use catalog::{BackupRun, Catalog, CatalogStore, Credentials, RunStatus, Target};
pub use engine::{CommandTemplate, CommandTemplates, Engine};
pub use error::{BackupError, ErrorKind, StoreError};
pub use executor::{BackupExecutor, ExecutorOptions};
pub use facade::{ApiError, ApiResult, Orchestrator, Settings};
pub use registry::{NewTarget, TargetRegistry};
