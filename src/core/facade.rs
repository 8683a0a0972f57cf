/// Orchestration facade
///
/// The boundary surface transports call (HTTP handlers, CLI commands).
/// It composes the registry and the executor and turns every engine error
/// into an `ApiError` carrying a machine-readable kind. Targets leave
/// this layer with their secret masked.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::core::catalog::{BackupRun, CatalogStore, Target};
use crate::core::engine::CommandTemplates;
use crate::core::error::{BackupError, ErrorKind, FieldError};
use crate::core::executor::{BackupExecutor, ExecutorOptions};
use crate::core::registry::{NewTarget, TargetRegistry};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Everything needed to assemble an orchestrator
#[derive(Debug, Clone)]
pub struct Settings {
    pub catalog_path: PathBuf,
    pub templates: CommandTemplates,
    pub executor: ExecutorOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u64>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        let (fields, run_id) = match err {
            BackupError::Validation(fields) => (fields, None),
            BackupError::ExecutionFailure { run_id, .. } | BackupError::Timeout { run_id, .. } => {
                (Vec::new(), Some(run_id))
            }
            _ => (Vec::new(), None),
        };

        Self { kind, message, fields, run_id }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<CatalogStore>,
    registry: TargetRegistry,
    executor: BackupExecutor,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Self {
        let store = Arc::new(CatalogStore::new(settings.catalog_path));
        let registry = TargetRegistry::new(Arc::clone(&store));
        let executor = BackupExecutor::new(
            Arc::clone(&store),
            registry.clone(),
            settings.templates,
            settings.executor,
        );

        Self { store, registry, executor }
    }

    /// Build an orchestrator and fail runs whose executor is gone
    ///
    /// Meant for entry points that execute backups; read-only callers use
    /// `new`.
    pub async fn open(settings: Settings) -> ApiResult<Self> {
        let orchestrator = Self::new(settings);
        let recovered = orchestrator.executor.recover_interrupted().await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered interrupted backup runs");
        }
        Ok(orchestrator)
    }

    pub fn catalog_path(&self) -> &std::path::Path {
        self.store.path()
    }

    pub fn executor_options(&self) -> &ExecutorOptions {
        self.executor.options()
    }

    pub async fn add_target(&self, input: NewTarget) -> ApiResult<Target> {
        let target = self.registry.register(input).await?;
        Ok(target.redacted())
    }

    pub async fn list_targets(&self) -> ApiResult<Vec<Target>> {
        let targets = self.registry.list().await?;
        Ok(targets.iter().map(Target::redacted).collect())
    }

    pub async fn get_target(&self, id: u64) -> ApiResult<Target> {
        Ok(self.registry.get(id).await?.redacted())
    }

    /// Remove a target unless a backup for it is in flight
    pub async fn remove_target(&self, id: u64) -> ApiResult<Target> {
        let _lease = self.executor.try_acquire(id)?;
        Ok(self.registry.remove(id).await?.redacted())
    }

    pub async fn run_backup(&self, target_id: u64) -> ApiResult<BackupRun> {
        Ok(self.executor.run_backup(target_id).await?)
    }

    pub async fn list_runs(&self, target_id: Option<u64>) -> ApiResult<Vec<BackupRun>> {
        Ok(self.executor.list_runs(target_id).await?)
    }
}
