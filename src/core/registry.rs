/// Target registry: validation and lifecycle of backup targets

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::core::catalog::{CatalogStore, Credentials, Target};
use crate::core::engine::Engine;
use crate::core::error::{BackupError, FieldError, FieldProblem, Result};

/// Unvalidated input for a new target, as received from a caller
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTarget {
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub database_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub secret: String,
}

struct ValidTarget {
    engine: Engine,
    location: String,
    database_name: String,
    credentials: Credentials,
}

fn required(field: &'static str, value: &str, errors: &mut Vec<FieldError>) -> String {
    let value = value.trim();
    if value.is_empty() {
        errors.push(FieldError { field, problem: FieldProblem::Missing });
    }
    value.to_string()
}

/// Check every field and report all problems at once
fn validate(input: &NewTarget) -> std::result::Result<ValidTarget, Vec<FieldError>> {
    let mut errors = Vec::new();

    let engine = if input.engine.trim().is_empty() {
        errors.push(FieldError { field: "engine", problem: FieldProblem::Missing });
        None
    } else {
        match input.engine.parse::<Engine>() {
            Ok(engine) => Some(engine),
            Err(e) => {
                errors.push(FieldError {
                    field: "engine",
                    problem: FieldProblem::Invalid(e.to_string()),
                });
                None
            }
        }
    };

    let location = required("location", &input.location, &mut errors);
    let database_name = required("database_name", &input.database_name, &mut errors);
    let username = required("username", &input.username, &mut errors);

    // Secrets are taken verbatim; only emptiness is checked
    if input.secret.is_empty() {
        errors.push(FieldError { field: "secret", problem: FieldProblem::Missing });
    }

    match engine {
        Some(engine) if errors.is_empty() => Ok(ValidTarget {
            engine,
            location,
            database_name,
            credentials: Credentials::new(username, input.secret.clone()),
        }),
        _ => Err(errors),
    }
}

#[derive(Clone)]
pub struct TargetRegistry {
    store: Arc<CatalogStore>,
}

impl TargetRegistry {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn register(&self, input: NewTarget) -> Result<Target> {
        let valid = validate(&input).map_err(BackupError::Validation)?;

        let target = self
            .store
            .update(|catalog| {
                let target = Target {
                    id: catalog.allocate_target_id(),
                    engine: valid.engine,
                    location: valid.location,
                    database_name: valid.database_name,
                    credentials: valid.credentials,
                    created_at: Utc::now(),
                };
                catalog.targets.push(target.clone());
                Ok::<_, BackupError>(target)
            })
            .await?;

        info!(
            target_id = target.id,
            engine = %target.engine,
            location = %target.location,
            "registered backup target"
        );
        Ok(target)
    }

    pub async fn list(&self) -> Result<Vec<Target>> {
        Ok(self.store.load().await?.targets)
    }

    pub async fn get(&self, id: u64) -> Result<Target> {
        self.store
            .load()
            .await?
            .target(id)
            .cloned()
            .ok_or(BackupError::NotFound(id))
    }

    /// Delete a target; its run history is kept
    pub async fn remove(&self, id: u64) -> Result<Target> {
        let removed = self
            .store
            .update(|catalog| {
                let pos = catalog
                    .targets
                    .iter()
                    .position(|t| t.id == id)
                    .ok_or(BackupError::NotFound(id))?;
                Ok::<_, BackupError>(catalog.targets.remove(pos))
            })
            .await?;

        info!(target_id = id, "removed backup target");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> TargetRegistry {
        TargetRegistry::new(Arc::new(CatalogStore::new(dir.path().join("catalog.json"))))
    }

    fn mysql_target(location: &str) -> NewTarget {
        NewTarget {
            engine: "mysql".to_string(),
            location: location.to_string(),
            database_name: "app".to_string(),
            username: "u".to_string(),
            secret: "p".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_assigns_sequential_ids() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let mut ids = Vec::new();
        for loc in ["a", "b", "c"] {
            ids.push(registry.register(mysql_target(loc)).await.unwrap().id);
        }
        assert_eq!(ids, vec![1, 2, 3]);

        let listed = registry.list().await.unwrap();
        let locations: Vec<&str> = listed.iter().map(|t| t.location.as_str()).collect();
        assert_eq!(locations, vec!["a", "b", "c"]);
        assert_eq!(listed.iter().map(|t| t.id).collect::<Vec<_>>(), ids);
    }

    #[tokio::test]
    async fn test_validation_reports_every_field() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let err = registry
            .register(NewTarget {
                engine: "oracle".to_string(),
                location: "  ".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();

        let BackupError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        let names: Vec<&str> = fields.iter().map(|f| f.field).collect();
        assert_eq!(names, vec!["engine", "location", "database_name", "username", "secret"]);
        assert!(matches!(fields[0].problem, FieldProblem::Invalid(_)));

        // Nothing was persisted
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fields_are_trimmed() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let mut input = mysql_target("  db1 ");
        input.engine = " MySQL".to_string();
        input.secret = " spaced ".to_string();
        let target = registry.register(input).await.unwrap();

        assert_eq!(target.location, "db1");
        assert_eq!(target.engine, Engine::Mysql);
        assert_eq!(target.credentials.secret, " spaced ");
    }

    #[tokio::test]
    async fn test_get_and_remove() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        registry.register(mysql_target("a")).await.unwrap();
        registry.register(mysql_target("b")).await.unwrap();

        assert_eq!(registry.get(2).await.unwrap().location, "b");
        assert!(matches!(registry.get(9).await, Err(BackupError::NotFound(9))));

        let removed = registry.remove(2).await.unwrap();
        assert_eq!(removed.location, "b");
        assert!(matches!(registry.remove(2).await, Err(BackupError::NotFound(2))));

        // A removed id is never handed out again
        let next = registry.register(mysql_target("c")).await.unwrap();
        assert_eq!(next.id, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let tasks = (0..16).map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.register(mysql_target(&format!("db{}", i))).await })
        });
        let results = futures::future::join_all(tasks).await;

        let mut ids: Vec<u64> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap().id)
            .collect();
        ids.sort();
        assert_eq!(ids, (1..=16).collect::<Vec<_>>());
        assert_eq!(registry.list().await.unwrap().len(), 16);
    }
}
