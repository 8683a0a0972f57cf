/// Catalog of backup targets and run history
///
/// The catalog is one JSON document holding every target and every run.
/// It is always rewritten as a whole: serialized to a temporary file in
/// the same directory, synced, then renamed over the previous version.
/// A reader therefore sees either the old or the new catalog, never a
/// partial write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::core::engine::Engine;
use crate::core::error::StoreError;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"****")
            .finish()
    }
}

/// A registered backup source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: u64,
    pub engine: Engine,
    pub location: String,
    pub database_name: String,
    pub credentials: Credentials,
    pub created_at: DateTime<Utc>,
}

impl Target {
    /// Copy of the target that is safe to hand out
    pub fn redacted(&self) -> Target {
        Target {
            credentials: Credentials::new(self.credentials.username.clone(), "****"),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backup attempt against a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRun {
    pub id: u64,
    pub target_id: u64,
    pub engine: Engine,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub artifact_path: Option<PathBuf>,
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_written: Option<u64>,
    /// Process that is executing the run; cleared once it finishes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_pid: Option<u32>,
}

impl BackupRun {
    pub fn started(id: u64, target: &Target, owner_pid: u32) -> Self {
        Self {
            id,
            target_id: target.id,
            engine: target.engine.clone(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            artifact_path: None,
            error_detail: None,
            exit_code: None,
            bytes_written: None,
            owner_pid: Some(owner_pid),
        }
    }

    pub fn succeed(&mut self, artifact_path: PathBuf, bytes_written: u64) {
        self.status = RunStatus::Succeeded;
        self.finished_at = Some(Utc::now());
        self.artifact_path = Some(artifact_path);
        self.bytes_written = Some(bytes_written);
        self.exit_code = Some(0);
        self.owner_pid = None;
    }

    pub fn fail(&mut self, detail: String, exit_code: Option<i32>) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.artifact_path = None;
        self.error_detail = Some(detail);
        self.exit_code = exit_code;
        self.owner_pid = None;
    }
}

/// Everything persisted: targets in id order, runs in start order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub next_target_id: u64,
    #[serde(default)]
    pub next_run_id: u64,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub runs: Vec<BackupRun>,
}

impl Catalog {
    pub fn target(&self, id: u64) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn run(&self, id: u64) -> Option<&BackupRun> {
        self.runs.iter().find(|r| r.id == id)
    }

    pub fn run_mut(&mut self, id: u64) -> Option<&mut BackupRun> {
        self.runs.iter_mut().find(|r| r.id == id)
    }

    /// `max(existing ids) + 1`, never below the persisted high-water mark
    pub fn allocate_target_id(&mut self) -> u64 {
        let max_id = self.targets.iter().map(|t| t.id).max().unwrap_or(0);
        let id = (max_id + 1).max(self.next_target_id).max(1);
        self.next_target_id = id + 1;
        id
    }

    pub fn allocate_run_id(&mut self) -> u64 {
        let max_id = self.runs.iter().map(|r| r.id).max().unwrap_or(0);
        let id = (max_id + 1).max(self.next_run_id).max(1);
        self.next_run_id = id + 1;
        id
    }

    fn check_consistency(&self) -> std::result::Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.id) {
                return Err(format!("duplicate target id {}", target.id));
            }
        }

        seen.clear();
        for run in &self.runs {
            if !seen.insert(run.id) {
                return Err(format!("duplicate run id {}", run.id));
            }
        }

        Ok(())
    }
}

/// Record layout of the flat list written by earlier versions
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    id: u64,
    #[serde(rename = "type")]
    db_type: String,
    container_name: String,
    db_name: String,
    username: String,
    password: String,
}

fn parse_catalog(contents: &str) -> std::result::Result<Catalog, String> {
    let value: serde_json::Value = serde_json::from_str(contents).map_err(|e| e.to_string())?;

    let catalog = if value.is_array() {
        let records: Vec<LegacyRecord> =
            serde_json::from_value(value).map_err(|e| format!("legacy list: {}", e))?;
        let mut catalog = Catalog::default();
        for record in records {
            // Unknown types load; they fail only when backed up
            catalog.targets.push(Target {
                id: record.id,
                engine: Engine::from_name(&record.db_type),
                location: record.container_name,
                database_name: record.db_name,
                credentials: Credentials::new(record.username, record.password),
                created_at: DateTime::<Utc>::default(),
            });
        }
        catalog
    } else {
        serde_json::from_value(value).map_err(|e| e.to_string())?
    };

    catalog.check_consistency()?;
    Ok(catalog)
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Durable owner of the catalog file
///
/// A single write-preferring lock guards the whole file. `update` is the
/// read-modify-write unit every mutating caller goes through.
pub struct CatalogStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted catalog; an absent file is an empty catalog
    pub async fn load(&self) -> Result<Catalog, StoreError> {
        let _guard = self.lock.read().await;
        self.read_from_disk()
    }

    /// Atomically replace the persisted catalog
    pub async fn save(&self, catalog: &Catalog) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        self.stage(catalog)?.commit()
    }

    /// Load, apply `f`, and persist, all under the write lock.
    ///
    /// Nothing is written when `f` returns an error.
    pub async fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Catalog) -> Result<T, E>,
        E: From<StoreError>,
    {
        let _guard = self.lock.write().await;
        let mut catalog = self.read_from_disk()?;
        let out = f(&mut catalog)?;
        self.stage(&catalog)?.commit()?;
        Ok(out)
    }

    /// Write `catalog` to a temporary sibling file without publishing it
    pub fn stage(&self, catalog: &Catalog) -> Result<StagedCatalog, StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let data = serde_json::to_vec_pretty(catalog).map_err(|e| StoreError::CorruptData {
            path: self.path.clone(),
            reason: format!("serialize: {}", e),
        })?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "catalog.json".to_string());
        let tmp_path = dir.join(format!(
            ".{}.tmp.{}.{}",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let staged = StagedCatalog {
            tmp_path,
            target: self.path.clone(),
            committed: false,
        };

        let mut file = File::create(&staged.tmp_path).map_err(|e| StoreError::io(&staged.tmp_path, e))?;
        file.write_all(&data).map_err(|e| StoreError::io(&staged.tmp_path, e))?;
        file.write_all(b"\n").map_err(|e| StoreError::io(&staged.tmp_path, e))?;
        file.sync_all().map_err(|e| StoreError::io(&staged.tmp_path, e))?;

        Ok(staged)
    }

    fn read_from_disk(&self) -> Result<Catalog, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Catalog::default()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        parse_catalog(&contents).map_err(|reason| StoreError::CorruptData {
            path: self.path.clone(),
            reason,
        })
    }
}

/// A fully written temporary catalog awaiting its rename
///
/// Dropping it uncommitted removes the temporary file.
pub struct StagedCatalog {
    tmp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedCatalog {
    pub fn temp_path(&self) -> &Path {
        &self.tmp_path
    }

    pub fn commit(mut self) -> Result<(), StoreError> {
        fs::rename(&self.tmp_path, &self.target).map_err(|e| StoreError::io(&self.target, e))?;
        self.committed = true;
        sync_parent_dir(&self.target);
        Ok(())
    }
}

impl Drop for StagedCatalog {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    // Best effort: makes the rename itself durable on most filesystems
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
