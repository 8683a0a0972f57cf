/// CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "dbvault")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/dbvault/config.toml)
    #[arg(long = "config", global = true)]
    pub config_file: Option<PathBuf>,

    /// Catalog file holding targets and run history
    #[arg(long, global = true)]
    pub catalog: Option<String>,

    /// Directory that receives backup artifacts
    #[arg(long, global = true)]
    pub output_dir: Option<String>,

    /// Container runtime binary (docker, podman)
    #[arg(long, global = true)]
    pub runtime: Option<String>,

    /// Maximum backup duration, e.g. 30m
    #[arg(long, global = true)]
    pub timeout: Option<String>,

    /// Increase log verbosity
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage backup targets
    Target {
        #[command(subcommand)]
        command: TargetCommands,
    },

    /// Backup operations
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Show backup run history
    Runs {
        /// Only runs of this target
        #[arg(short, long)]
        target: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Run HTTP API server mode
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Enable CORS for cross-origin requests
        #[arg(long)]
        cors: bool,
    },
}

#[derive(Subcommand)]
pub enum TargetCommands {
    /// Register a new target
    Add {
        /// Database engine (mysql, mariadb, postgres)
        #[arg(short, long)]
        engine: String,

        /// Container name or host
        #[arg(short, long)]
        location: String,

        /// Database to dump
        #[arg(short, long)]
        database: String,

        /// Database user
        #[arg(short, long)]
        username: String,

        /// Database password (falls back to DBVAULT_SECRET)
        #[arg(short, long, env = "DBVAULT_SECRET", hide_env_values = true)]
        secret: String,
    },

    /// List targets
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a single target
    Show { id: u64 },

    /// Remove a target
    Remove { id: u64 },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Run a backup of one target now
    Run { id: u64 },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// View effective configuration
    Show,

    /// Validate configuration
    Validate,
}
