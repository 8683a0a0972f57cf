/// Application configuration management
/// Stores settings in ~/.config/dbvault/config.toml
///
/// Precedence, lowest first: built-in defaults, config file,
/// `DBVAULT_*` environment variables, command-line flags.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::engine::{CommandTemplate, CommandTemplates, Engine, DEFAULT_RUNTIME};
use crate::core::executor::ExecutorOptions;
use crate::core::facade::Settings;
use crate::utils::is_dir_writable;

/// Catalog file name used when nothing else is configured
pub const DEFAULT_CATALOG_FILE: &str = "db_config.json";

pub const ENV_CATALOG: &str = "DBVAULT_CATALOG";
pub const ENV_OUTPUT_DIR: &str = "DBVAULT_OUTPUT_DIR";
pub const ENV_RUNTIME: &str = "DBVAULT_RUNTIME";
pub const ENV_TIMEOUT: &str = "DBVAULT_TIMEOUT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub catalog_path: Option<String>,
    pub output_dir: Option<String>,
    /// Container runtime binary (docker, podman, ...)
    pub runtime: Option<String>,
    /// Maximum backup duration, e.g. "30m"; unset means no limit
    pub timeout: Option<String>,
    /// Per-engine command template overrides, keyed by engine name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templates: BTreeMap<String, CommandTemplate>,
}

impl AppConfig {
    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("dbvault");
        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path()?)
    }

    /// Load configuration from file; a missing file yields defaults
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Apply `DBVAULT_*` variables from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty(ENV_CATALOG) {
            self.catalog_path = Some(v);
        }
        if let Some(v) = non_empty(ENV_OUTPUT_DIR) {
            self.output_dir = Some(v);
        }
        if let Some(v) = non_empty(ENV_RUNTIME) {
            self.runtime = Some(v);
        }
        if let Some(v) = non_empty(ENV_TIMEOUT) {
            self.timeout = Some(v);
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        PathBuf::from(self.catalog_path.as_deref().unwrap_or(DEFAULT_CATALOG_FILE))
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.output_dir.as_deref().unwrap_or("."))
    }

    pub fn runtime(&self) -> &str {
        self.runtime.as_deref().unwrap_or(DEFAULT_RUNTIME)
    }

    pub fn timeout(&self) -> Result<Option<Duration>> {
        match self.timeout.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => humantime::parse_duration(raw)
                .map(Some)
                .with_context(|| format!("Invalid timeout '{}'", raw)),
        }
    }

    /// Built-in templates for the configured runtime, with file overrides applied
    pub fn templates(&self) -> Result<CommandTemplates> {
        let mut templates = CommandTemplates::defaults(self.runtime());
        for (name, template) in &self.templates {
            let engine: Engine = name
                .parse()
                .map_err(|e| anyhow!("templates.{}: {}", name, e))?;
            templates.insert(engine, template.clone());
        }
        Ok(templates)
    }

    pub fn settings(&self) -> Result<Settings> {
        Ok(Settings {
            catalog_path: self.catalog_path(),
            templates: self.templates()?,
            executor: ExecutorOptions {
                output_dir: self.output_dir(),
                timeout: self.timeout()?,
            },
        })
    }

    /// Human-readable problems; empty when the configuration is usable
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = self.timeout() {
            errors.push(format!("{:#}", e));
        }
        if let Err(e) = self.templates() {
            errors.push(e.to_string());
        }
        for (name, template) in &self.templates {
            if template.program.trim().is_empty() {
                errors.push(format!("templates.{}: program is empty", name));
            }
        }

        let output_dir = self.output_dir();
        if output_dir.exists() && !is_dir_writable(&output_dir) {
            errors.push(format!("output_dir {} is not a writable directory", output_dir.display()));
        }

        errors
    }
}
