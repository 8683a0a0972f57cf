/// Backup execution
///
/// Runs the dump command for one target at a time per target. A run is
/// recorded as `running` before the process starts and moved to a
/// terminal state afterwards. The catalog lock is only taken for those
/// two short writes, never while the dump tool is running.
///
/// Once a run is recorded it executes on its own task, so a caller that
/// goes away (a dropped HTTP request) does not cancel the dump.

use chrono::Local;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::core::catalog::{BackupRun, CatalogStore, RunStatus, Target};
use crate::core::engine::{BuiltCommand, CommandTemplate, CommandTemplates, Engine, TemplateContext};
use crate::core::error::{BackupError, Result};
use crate::core::registry::TargetRegistry;
use crate::utils::truncate_utf8;

/// Upper bound for captured diagnostic text stored in a failed run
pub const MAX_DIAGNOSTIC_BYTES: usize = 1024;

const MAX_NAME_ATTEMPTS: u32 = 1000;

const INTERRUPTED_DETAIL: &str = "interrupted: process exited before the backup finished";

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub output_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            timeout: None,
        }
    }
}

type LockTable = Arc<Mutex<HashSet<u64>>>;

fn lock_table(table: &LockTable) -> MutexGuard<'_, HashSet<u64>> {
    // The set stays consistent even if a holder panicked
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Lease table shared by every executor of this process on one catalog file
fn shared_lock_table(catalog: &Path) -> LockTable {
    static TABLES: OnceLock<Mutex<HashMap<PathBuf, LockTable>>> = OnceLock::new();

    let mut tables = TABLES
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(tables.entry(catalog.to_path_buf()).or_default())
}

/// Exclusive claim on one target, released on drop
pub struct TargetLease {
    target_id: u64,
    table: LockTable,
}

impl Drop for TargetLease {
    fn drop(&mut self) {
        lock_table(&self.table).remove(&self.target_id);
    }
}

/// Why a started run did not succeed
enum Failure {
    Artifact(io::Error),
    Launch(io::Error),
    Exit { code: Option<i32>, stderr: String },
    Timeout(Duration),
}

impl Failure {
    fn detail(&self, command: &BuiltCommand) -> String {
        let text = match self {
            Failure::Artifact(e) => format!("cannot create artifact file: {}", e),
            Failure::Launch(e) => format!("failed to launch '{}': {}", command.program, e),
            Failure::Exit { code, stderr } => {
                let head = match code {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by signal".to_string(),
                };
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    head
                } else {
                    format!("{}: {}", head, stderr)
                }
            }
            Failure::Timeout(limit) => {
                format!("timed out after {}", humantime::format_duration(*limit))
            }
        };

        let redacted = command.redact(&text);
        truncate_utf8(&redacted, MAX_DIAGNOSTIC_BYTES).to_string()
    }

    fn exit_code(&self) -> Option<i32> {
        match self {
            Failure::Exit { code, .. } => *code,
            _ => None,
        }
    }
}

/// `backup_{engine}_{target_id}_{timestamp}[_{n}][.ext]`
pub fn artifact_name(engine: &Engine, target_id: u64, timestamp: &str, attempt: u32, extension: &str) -> String {
    let mut name = format!("backup_{}_{}_{}", engine, target_id, timestamp);
    if attempt > 0 {
        name.push_str(&format!("_{}", attempt));
    }
    if !extension.is_empty() {
        name.push('.');
        name.push_str(extension);
    }
    name
}

/// Create the artifact file exclusively, adding a suffix on name collisions
fn create_artifact(dir: &Path, target: &Target, extension: &str) -> io::Result<(File, PathBuf)> {
    fs::create_dir_all(dir)?;
    let timestamp = Local::now().format("%Y%m%d%H%M%S").to_string();

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(artifact_name(&target.engine, target.id, &timestamp, attempt, extension));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free artifact name after {} attempts", MAX_NAME_ATTEMPTS),
    ))
}

fn discard_artifact(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial artifact");
        }
    }
}

/// Keep at most `limit` bytes of `reader`, then drain the rest
async fn read_bounded<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };

    let mut kept = Vec::new();
    let _ = (&mut reader).take(limit as u64).read_to_end(&mut kept).await;
    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    kept
}

/// Whether a `running` run no longer has a live executor behind it
fn is_abandoned(run: &BackupRun, own_pid: u32, leased: &HashSet<u64>, sys: &mut System) -> bool {
    match run.owner_pid {
        Some(pid) if pid == own_pid => !leased.contains(&run.target_id),
        Some(pid) => !sys.refresh_process(Pid::from_u32(pid)),
        None => true,
    }
}

#[derive(Clone)]
pub struct BackupExecutor {
    store: Arc<CatalogStore>,
    registry: TargetRegistry,
    templates: Arc<CommandTemplates>,
    options: ExecutorOptions,
    running: LockTable,
}

impl BackupExecutor {
    pub fn new(
        store: Arc<CatalogStore>,
        registry: TargetRegistry,
        templates: CommandTemplates,
        options: ExecutorOptions,
    ) -> Self {
        let running = shared_lock_table(store.path());
        Self {
            store,
            registry,
            templates: Arc::new(templates),
            options,
            running,
        }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Claim a target without blocking; `AlreadyRunning` if someone holds it
    pub fn try_acquire(&self, target_id: u64) -> Result<TargetLease> {
        if !lock_table(&self.running).insert(target_id) {
            return Err(BackupError::AlreadyRunning(target_id));
        }

        Ok(TargetLease {
            target_id,
            table: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self, target_id: u64) -> bool {
        lock_table(&self.running).contains(&target_id)
    }

    pub async fn run_backup(&self, target_id: u64) -> Result<BackupRun> {
        let target = self.registry.get(target_id).await?;
        let template = self
            .templates
            .get(&target.engine)
            .cloned()
            .ok_or_else(|| BackupError::UnsupportedEngine(target.engine.to_string()))?;

        let lease = self.try_acquire(target_id)?;

        // The target may have been removed between the lookup and the lease.
        // Nothing awaits between this write and the spawn below, so a
        // recorded run always has a task that finishes it.
        let owner_pid = std::process::id();
        let run = self
            .store
            .update(|catalog| {
                let target = catalog
                    .target(target_id)
                    .cloned()
                    .ok_or(BackupError::NotFound(target_id))?;
                let run = BackupRun::started(catalog.allocate_run_id(), &target, owner_pid);
                catalog.runs.push(run.clone());
                Ok::<_, BackupError>(run)
            })
            .await?;

        let run_id = run.id;
        info!(run_id, target_id, engine = %target.engine, "backup started");

        let executor = self.clone();
        let task = tokio::spawn(async move {
            let _lease = lease;
            executor.complete(run, target, template).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(BackupError::ExecutionFailure {
                run_id,
                exit_code: None,
                detail: "backup task was cancelled".to_string(),
            }),
        }
    }

    /// Execute a recorded run and persist its outcome
    async fn complete(&self, mut run: BackupRun, target: Target, template: CommandTemplate) -> Result<BackupRun> {
        let command = template.render(&TemplateContext {
            location: &target.location,
            database: &target.database_name,
            username: &target.credentials.username,
            secret: &target.credentials.secret,
        });
        debug!(run_id = run.id, command = %command, "dump command");

        let outcome = self.execute(&target, &template, &command).await;

        let result = match outcome {
            Ok((path, bytes)) => {
                info!(run_id = run.id, target_id = target.id, artifact = %path.display(), bytes, "backup succeeded");
                run.succeed(path, bytes);
                Ok(())
            }
            Err(failure) => {
                let detail = failure.detail(&command);
                run.fail(detail.clone(), failure.exit_code());
                warn!(run_id = run.id, target_id = target.id, detail = %detail, "backup failed");
                Err(match failure {
                    Failure::Timeout(after) => BackupError::Timeout { run_id: run.id, after },
                    other => BackupError::ExecutionFailure {
                        run_id: run.id,
                        exit_code: other.exit_code(),
                        detail,
                    },
                })
            }
        };

        let finished = run.clone();
        let recorded = self
            .store
            .update(move |catalog| {
                match catalog.run_mut(finished.id) {
                    Some(slot) => *slot = finished,
                    None => catalog.runs.push(finished),
                }
                Ok::<_, BackupError>(())
            })
            .await;

        // An artifact the catalog does not know about is removed
        if let Err(e) = recorded {
            if let Some(path) = &run.artifact_path {
                discard_artifact(path);
            }
            warn!(run_id = run.id, error = %e, "failed to record backup outcome");
            return Err(e);
        }

        result.map(|()| run)
    }

    async fn execute(
        &self,
        target: &Target,
        template: &CommandTemplate,
        command: &BuiltCommand,
    ) -> std::result::Result<(PathBuf, u64), Failure> {
        let (file, path) =
            create_artifact(&self.options.output_dir, target, &template.extension).map_err(Failure::Artifact)?;

        let mut cmd = command.to_command();
        cmd.stdout(Stdio::from(file)).stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                discard_artifact(&path);
                return Err(Failure::Launch(e));
            }
        };

        let stderr = child.stderr.take();
        let finished = async {
            let (stderr, status) = tokio::join!(read_bounded(stderr, MAX_DIAGNOSTIC_BYTES), child.wait());
            status.map(|status| (status, stderr))
        };

        let waited = match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, finished).await.map_err(|_| limit),
            None => Ok(finished.await),
        };

        let waited = match waited {
            Ok(waited) => waited,
            Err(limit) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed out dump process");
                }
                discard_artifact(&path);
                return Err(Failure::Timeout(limit));
            }
        };

        let (status, stderr) = match waited {
            Ok(waited) => waited,
            Err(e) => {
                discard_artifact(&path);
                return Err(Failure::Launch(e));
            }
        };

        if !status.success() {
            discard_artifact(&path);
            return Err(Failure::Exit {
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        let bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Ok((path, bytes))
    }

    /// Fail runs left `running` by an executor that no longer exists
    ///
    /// Runs owned by another live process are left alone. Nothing is
    /// written when there is nothing to recover.
    pub async fn recover_interrupted(&self) -> Result<Vec<u64>> {
        let catalog = self.store.load().await?;
        let own_pid = std::process::id();

        let stale: HashSet<u64> = {
            let leased = lock_table(&self.running);
            let mut sys = System::new();
            catalog
                .runs
                .iter()
                .filter(|run| run.status == RunStatus::Running)
                .filter(|run| is_abandoned(run, own_pid, &leased, &mut sys))
                .map(|run| run.id)
                .collect()
        };

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let recovered = self
            .store
            .update(move |catalog| {
                let mut recovered = Vec::new();
                for run in catalog.runs.iter_mut() {
                    if run.status == RunStatus::Running && stale.contains(&run.id) {
                        run.fail(INTERRUPTED_DETAIL.to_string(), None);
                        recovered.push(run.id);
                    }
                }
                Ok::<_, BackupError>(recovered)
            })
            .await?;

        for run_id in &recovered {
            warn!(run_id, "marked interrupted backup run as failed");
        }
        Ok(recovered)
    }

    /// Run history, newest first
    pub async fn list_runs(&self, target_id: Option<u64>) -> Result<Vec<BackupRun>> {
        let mut runs: Vec<BackupRun> = self
            .store
            .load()
            .await?
            .runs
            .into_iter()
            .filter(|r| target_id.map_or(true, |id| r.target_id == id))
            .collect();
        runs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(runs)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::registry::NewTarget;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        registry: TargetRegistry,
        executor: BackupExecutor,
        store: Arc<CatalogStore>,
    }

    /// Executor whose mysql template runs `sh <script>` with the usual arguments
    fn fixture(script: &str, timeout: Option<Duration>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let script_path = dir.path().join("dump.sh");
        fs::write(&script_path, script).unwrap();

        let mut templates = CommandTemplates::empty();
        templates.insert(
            Engine::Mysql,
            CommandTemplate {
                program: "sh".to_string(),
                args: vec![
                    script_path.display().to_string(),
                    "{location}".to_string(),
                    "-u".to_string(),
                    "{username}".to_string(),
                    "-p{secret}".to_string(),
                    "{database}".to_string(),
                ],
                env: BTreeMap::new(),
                extension: "sql".to_string(),
            },
        );

        let store = Arc::new(CatalogStore::new(dir.path().join("catalog.json")));
        let registry = TargetRegistry::new(Arc::clone(&store));
        let executor = BackupExecutor::new(
            Arc::clone(&store),
            registry.clone(),
            templates,
            ExecutorOptions {
                output_dir: dir.path().join("out"),
                timeout,
            },
        );

        Fixture { dir, registry, executor, store }
    }

    fn target(engine: &str) -> NewTarget {
        NewTarget {
            engine: engine.to_string(),
            location: "db1".to_string(),
            database_name: "app".to_string(),
            username: "u".to_string(),
            secret: "s3cr3t".to_string(),
        }
    }

    fn artifacts(fx: &Fixture) -> Vec<PathBuf> {
        match fs::read_dir(fx.dir.path().join("out")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(
            artifact_name(&Engine::Mysql, 1, "20240101120000", 0, "sql"),
            "backup_mysql_1_20240101120000.sql"
        );
        assert_eq!(
            artifact_name(&Engine::Postgres, 7, "20240101120000", 2, ""),
            "backup_postgres_7_20240101120000_2"
        );
    }

    #[test]
    fn test_name_collision_gets_suffix() {
        let dir = TempDir::new().unwrap();
        let target = Target {
            id: 3,
            engine: Engine::Mysql,
            location: "db1".to_string(),
            database_name: "app".to_string(),
            credentials: crate::core::catalog::Credentials::new("u", "p"),
            created_at: chrono::Utc::now(),
        };

        let (_, first) = create_artifact(dir.path(), &target, "sql").unwrap();
        fs::write(&first, "keep me").unwrap();
        let (_, second) = create_artifact(dir.path(), &target, "sql").unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(&first).unwrap(), "keep me");
        let name = second.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("backup_mysql_3_"));
        assert!(name.ends_with(".sql"));
    }

    #[tokio::test]
    async fn test_successful_backup_writes_artifact() {
        let fx = fixture("printf OK\n", None);
        let target = fx.registry.register(target("mysql")).await.unwrap();

        let run = fx.executor.run_backup(target.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.bytes_written, Some(2));
        assert!(run.finished_at.is_some());
        assert!(run.error_detail.is_none());

        let path = run.artifact_path.clone().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "OK");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("backup_mysql_1_"), "{}", name);

        let stored = fx.store.load().await.unwrap();
        assert_eq!(stored.runs, vec![run]);
        assert!(!fx.executor.is_running(target.id));
    }

    #[tokio::test]
    async fn test_failed_backup_cleans_up_and_redacts() {
        let fx = fixture("printf partial\necho \"access denied: $*\" >&2\nexit 3\n", None);
        let target = fx.registry.register(target("mysql")).await.unwrap();

        let err = fx.executor.run_backup(target.id).await.unwrap_err();
        let BackupError::ExecutionFailure { run_id, exit_code, detail } = err else {
            panic!("expected execution failure");
        };
        assert_eq!(exit_code, Some(3));
        assert!(detail.starts_with("exit code 3: access denied"), "{}", detail);
        assert!(!detail.contains("s3cr3t"));
        assert!(detail.contains("-p****"));

        assert!(artifacts(&fx).is_empty(), "partial artifact left behind");

        let stored = fx.store.load().await.unwrap();
        let run = stored.run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.exit_code, Some(3));
        assert!(run.artifact_path.is_none());
        assert!(run.error_detail.as_deref().unwrap().contains("exit code 3"));
    }

    #[tokio::test]
    async fn test_diagnostics_are_bounded() {
        let fx = fixture("i=0; while [ $i -lt 400 ]; do printf 'xxxxxxxxxx' >&2; i=$((i+1)); done; exit 1\n", None);
        let target = fx.registry.register(target("mysql")).await.unwrap();

        let err = fx.executor.run_backup(target.id).await.unwrap_err();
        let BackupError::ExecutionFailure { detail, .. } = err else {
            panic!("expected execution failure");
        };
        assert!(detail.len() <= MAX_DIAGNOSTIC_BYTES);
        assert!(detail.starts_with("exit code 1: xxx"));
    }

    #[tokio::test]
    async fn test_launch_failure_is_recorded() {
        let fx = fixture("", None);
        let mut templates = CommandTemplates::empty();
        templates.insert(
            Engine::Mysql,
            CommandTemplate::default_for(&Engine::Mysql, "/nonexistent/dbvault-runtime"),
        );
        let executor = BackupExecutor::new(
            Arc::clone(&fx.store),
            fx.registry.clone(),
            templates,
            fx.executor.options().clone(),
        );
        let target = fx.registry.register(target("mysql")).await.unwrap();

        let err = executor.run_backup(target.id).await.unwrap_err();
        let BackupError::ExecutionFailure { exit_code, detail, .. } = err else {
            panic!("expected execution failure");
        };
        assert_eq!(exit_code, None);
        assert!(detail.starts_with("failed to launch"));
        assert!(artifacts(&fx).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_target_and_unsupported_engine() {
        let fx = fixture("printf OK\n", None);
        assert!(matches!(fx.executor.run_backup(42).await, Err(BackupError::NotFound(42))));

        let pg = fx.registry.register(target("postgres")).await.unwrap();
        match fx.executor.run_backup(pg.id).await {
            Err(BackupError::UnsupportedEngine(engine)) => assert_eq!(engine, "postgres"),
            other => panic!("expected UnsupportedEngine, got {:?}", other),
        }
        assert!(fx.store.load().await.unwrap().runs.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_runs_for_one_target() {
        let fx = fixture("sleep 1\nprintf OK\n", None);
        let target = fx.registry.register(target("mysql")).await.unwrap();

        let first = {
            let executor = fx.executor.clone();
            tokio::spawn(async move { executor.run_backup(target.id).await })
        };

        // Wait until the first run holds the lease
        while !fx.executor.is_running(target.id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let second = fx.executor.run_backup(target.id).await;
        assert!(matches!(second, Err(BackupError::AlreadyRunning(id)) if id == target.id));

        let run = first.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);

        let stored = fx.store.load().await.unwrap();
        assert_eq!(stored.runs.len(), 1);
        assert!(!fx.executor.is_running(target.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_other_targets_are_not_blocked() {
        let fx = fixture("sleep 1\nprintf OK\n", None);
        let a = fx.registry.register(target("mysql")).await.unwrap();
        let b = fx.registry.register(target("mysql")).await.unwrap();

        let (ra, rb) = tokio::join!(fx.executor.run_backup(a.id), fx.executor.run_backup(b.id));
        assert_eq!(ra.unwrap().status, RunStatus::Succeeded);
        assert_eq!(rb.unwrap().status, RunStatus::Succeeded);
        assert_eq!(artifacts(&fx).len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let fx = fixture("printf partial\nsleep 10\n", Some(Duration::from_millis(200)));
        let target = fx.registry.register(target("mysql")).await.unwrap();

        let started = std::time::Instant::now();
        let err = fx.executor.run_backup(target.id).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));

        let BackupError::Timeout { run_id, after } = err else {
            panic!("expected timeout");
        };
        assert_eq!(after, Duration::from_millis(200));
        assert!(artifacts(&fx).is_empty());

        let stored = fx.store.load().await.unwrap();
        let run = stored.run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_detail.as_deref().unwrap().starts_with("timed out after"));
    }

    async fn wait_until_idle(executor: &BackupExecutor, target_id: u64) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while executor.is_running(target_id) {
            assert!(std::time::Instant::now() < deadline, "backup never finished");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_caller_does_not_cancel_backup() {
        let fx = fixture("printf partial\nsleep 1\nprintf OK\n", None);
        let target = fx.registry.register(target("mysql")).await.unwrap();

        let attempt = tokio::time::timeout(Duration::from_millis(200), fx.executor.run_backup(target.id)).await;
        assert!(attempt.is_err());
        assert!(fx.executor.is_running(target.id));

        wait_until_idle(&fx.executor, target.id).await;

        let stored = fx.store.load().await.unwrap();
        assert_eq!(stored.runs.len(), 1);
        let run = &stored.runs[0];
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.finished_at.is_some());
        assert_eq!(run.owner_pid, None);
        assert_eq!(fs::read_to_string(run.artifact_path.as_ref().unwrap()).unwrap(), "partialOK");
        assert_eq!(artifacts(&fx).len(), 1);
    }

    #[tokio::test]
    async fn test_unrecorded_outcome_removes_artifact() {
        let fx = fixture("", None);
        let catalog = fx.store.path().display().to_string();
        // The dump succeeds but leaves the catalog unreadable
        fs::write(
            fx.dir.path().join("dump.sh"),
            format!("printf OK\nrm -f '{0}'\nmkdir '{0}'\n", catalog),
        )
        .unwrap();
        let target = fx.registry.register(target("mysql")).await.unwrap();

        let err = fx.executor.run_backup(target.id).await.unwrap_err();
        assert!(matches!(err, BackupError::Store(_)), "{:?}", err);
        assert!(artifacts(&fx).is_empty());
        assert!(!fx.executor.is_running(target.id));
    }

    #[tokio::test]
    async fn test_read_bounded_keeps_prefix_and_drains() {
        let data = vec![b'x'; 10_000];
        let mut reader: &[u8] = &data;

        let kept = read_bounded(Some(&mut reader), 100).await;
        assert_eq!(kept.len(), 100);
        assert!(reader.is_empty());

        assert!(read_bounded(None::<&[u8]>, 100).await.is_empty());
    }

    #[tokio::test]
    async fn test_recover_interrupted_runs() {
        let fx = fixture("printf OK\n", None);
        let target = fx.registry.register(target("mysql")).await.unwrap();

        fx.store
            .update(|catalog| {
                let run = BackupRun::started(catalog.allocate_run_id(), &target, std::process::id());
                catalog.runs.push(run);
                Ok::<_, BackupError>(())
            })
            .await
            .unwrap();

        let recovered = fx.executor.recover_interrupted().await.unwrap();
        assert_eq!(recovered, vec![1]);

        let runs = fx.executor.list_runs(Some(target.id)).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error_detail.as_deref(), Some(INTERRUPTED_DETAIL));
    }

    #[tokio::test]
    async fn test_recover_respects_other_live_processes() {
        let fx = fixture("printf OK\n", None);
        let live_target = fx.registry.register(target("mysql")).await.unwrap();
        let dead_target = fx.registry.register(target("mysql")).await.unwrap();

        let mut live = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let mut dead = std::process::Command::new("true").spawn().unwrap();
        dead.wait().unwrap();

        let (live_pid, dead_pid) = (live.id(), dead.id());
        fx.store
            .update(|catalog| {
                let run = BackupRun::started(catalog.allocate_run_id(), &live_target, live_pid);
                catalog.runs.push(run);
                let run = BackupRun::started(catalog.allocate_run_id(), &dead_target, dead_pid);
                catalog.runs.push(run);
                Ok::<_, BackupError>(())
            })
            .await
            .unwrap();

        let recovered = fx.executor.recover_interrupted().await;
        live.kill().unwrap();
        live.wait().unwrap();
        assert_eq!(recovered.unwrap(), vec![2]);

        let stored = fx.store.load().await.unwrap();
        assert_eq!(stored.run(1).unwrap().status, RunStatus::Running);
        assert_eq!(stored.run(2).unwrap().status, RunStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recover_skips_runs_leased_in_this_process() {
        let fx = fixture("sleep 1\nprintf OK\n", None);
        let target = fx.registry.register(target("mysql")).await.unwrap();

        let background = {
            let executor = fx.executor.clone();
            tokio::spawn(async move { executor.run_backup(target.id).await })
        };
        while !fx.executor.is_running(target.id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // A second executor on the same catalog sees the same leases
        let other = BackupExecutor::new(
            Arc::clone(&fx.store),
            fx.registry.clone(),
            CommandTemplates::empty(),
            fx.executor.options().clone(),
        );
        assert!(other.recover_interrupted().await.unwrap().is_empty());

        let run = background.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_recover_without_work_does_not_write() {
        let fx = fixture("printf OK\n", None);
        assert!(fx.executor.recover_interrupted().await.unwrap().is_empty());
        assert!(!fx.store.path().exists());
    }

    #[tokio::test]
    async fn test_list_runs_newest_first() {
        let fx = fixture("printf OK\n", None);
        let a = fx.registry.register(target("mysql")).await.unwrap();
        let b = fx.registry.register(target("mysql")).await.unwrap();

        fx.executor.run_backup(a.id).await.unwrap();
        fx.executor.run_backup(b.id).await.unwrap();
        fx.executor.run_backup(a.id).await.unwrap();

        let all: Vec<u64> = fx.executor.list_runs(None).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(all, vec![3, 2, 1]);

        let only_a: Vec<u64> = fx.executor.list_runs(Some(a.id)).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(only_a, vec![3, 1]);
    }
}
