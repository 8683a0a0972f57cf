mod cli;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{BackupCommands, Cli, Commands, ConfigCommands, TargetCommands};
use dbvault::core::{BackupRun, NewTarget, RunStatus, Target};
use dbvault::utils::{format_bytes, format_duration, format_timestamp, truncate_string};
use dbvault::{AppConfig, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Target { command } => {
            let orch = Orchestrator::new(config.settings()?);
            handle_target(&orch, command).await?;
        }
        Commands::Backup { command } => {
            let orch = open(&config).await?;
            handle_backup(&orch, command).await?;
        }
        Commands::Runs { target, json } => {
            let orch = Orchestrator::new(config.settings()?);
            handle_runs(&orch, target, json).await?;
        }
        Commands::Config { command } => {
            handle_config(&config, command)?;
        }
        #[cfg(feature = "server")]
        Commands::Serve { port, host, cors } => {
            let orch = open(&config).await?;
            dbvault::server::run(orch, host, port, cors).await?;
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) {
    #[cfg(feature = "server")]
    let serving = matches!(cli.command, Commands::Serve { .. });
    #[cfg(not(feature = "server"))]
    let serving = false;

    let default_level = if cli.verbose {
        "debug"
    } else if serving {
        "info"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Config file, then environment, then command-line flags
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config_file {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.apply_env();

    if let Some(v) = &cli.catalog {
        config.catalog_path = Some(v.clone());
    }
    if let Some(v) = &cli.output_dir {
        config.output_dir = Some(v.clone());
    }
    if let Some(v) = &cli.runtime {
        config.runtime = Some(v.clone());
    }
    if let Some(v) = &cli.timeout {
        config.timeout = Some(v.clone());
    }

    Ok(config)
}

/// Orchestrator for commands that run backups; recovers interrupted runs
async fn open(config: &AppConfig) -> Result<Orchestrator> {
    let settings = config.settings()?;
    let orch = Orchestrator::open(settings)
        .await
        .context("Failed to open catalog")?;
    Ok(orch)
}

async fn handle_target(orch: &Orchestrator, command: TargetCommands) -> Result<()> {
    match command {
        TargetCommands::Add {
            engine,
            location,
            database,
            username,
            secret,
        } => {
            let target = orch
                .add_target(NewTarget {
                    engine,
                    location,
                    database_name: database,
                    username,
                    secret,
                })
                .await?;
            println!("{} Registered target {}", "✓".green(), target.id.to_string().bold());
            print_target(&target);
        }
        TargetCommands::List { json } => {
            let targets = orch.list_targets().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&targets)?);
                return Ok(());
            }
            if targets.is_empty() {
                println!("No targets registered. Add one with: dbvault target add");
                return Ok(());
            }

            println!("{:<6} {:<10} {:<25} {:<20} {:<15}", "ID", "Engine", "Location", "Database", "User");
            println!("{}", "-".repeat(80));
            for t in &targets {
                println!(
                    "{:<6} {:<10} {:<25} {:<20} {:<15}",
                    t.id,
                    t.engine,
                    truncate_string(&t.location, 25),
                    truncate_string(&t.database_name, 20),
                    truncate_string(&t.credentials.username, 15)
                );
            }
        }
        TargetCommands::Show { id } => {
            let target = orch.get_target(id).await?;
            print_target(&target);
        }
        TargetCommands::Remove { id } => {
            let target = orch.remove_target(id).await?;
            println!(
                "{} Removed target {} ({} {}/{})",
                "✓".green(),
                target.id,
                target.engine,
                target.location,
                target.database_name
            );
        }
    }

    Ok(())
}

fn print_target(target: &Target) {
    println!("  Engine:   {}", target.engine);
    println!("  Location: {}", target.location);
    println!("  Database: {}", target.database_name);
    println!("  User:     {}", target.credentials.username);
    println!("  Secret:   {}", target.credentials.secret);
    println!("  Created:  {}", format_timestamp(&target.created_at));
}

async fn handle_backup(orch: &Orchestrator, command: BackupCommands) -> Result<()> {
    match command {
        BackupCommands::Run { id } => {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.cyan} {msg} [{elapsed}]")
                    .context("Invalid progress template")?,
            );
            spinner.set_message(format!("Backing up target {}", id));
            spinner.enable_steady_tick(Duration::from_millis(120));

            let result = orch.run_backup(id).await;
            spinner.finish_and_clear();

            let run = result?;
            println!("{} Backup completed (run {})", "✓".green(), run.id);
            if let Some(path) = &run.artifact_path {
                println!("  Artifact: {}", path.display());
            }
            if let Some(bytes) = run.bytes_written {
                println!("  Size:     {}", format_bytes(bytes));
            }
            println!("  Duration: {}", run_duration(&run));
        }
    }

    Ok(())
}

async fn handle_runs(orch: &Orchestrator, target: Option<u64>, json: bool) -> Result<()> {
    let runs = orch.list_runs(target).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No backup runs recorded.");
        return Ok(());
    }

    println!(
        "{:<6} {:<7} {:<10} {:<20} {:<10} {:<10} {}",
        "Run", "Target", "Status", "Started", "Duration", "Size", "Detail"
    );
    println!("{}", "-".repeat(100));
    for run in &runs {
        let status = match run.status {
            RunStatus::Succeeded => run.status.as_str().green(),
            RunStatus::Failed => run.status.as_str().red(),
            RunStatus::Running => run.status.as_str().yellow(),
        };
        let size = run.bytes_written.map(format_bytes).unwrap_or_else(|| "-".to_string());
        let detail = match (&run.artifact_path, &run.error_detail) {
            (_, Some(err)) => truncate_string(err, 60),
            (Some(path), None) => path.display().to_string(),
            (None, None) => String::new(),
        };
        println!(
            "{:<6} {:<7} {:<10} {:<20} {:<10} {:<10} {}",
            run.id,
            run.target_id,
            status,
            format_timestamp(&run.started_at),
            run_duration(run),
            size,
            detail
        );
    }

    Ok(())
}

fn run_duration(run: &BackupRun) -> String {
    match run.finished_at {
        Some(finished) => {
            let secs = (finished - run.started_at).num_seconds().max(0) as u64;
            format_duration(secs)
        }
        None => "-".to_string(),
    }
}

fn handle_config(config: &AppConfig, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let path = AppConfig::config_path()?;
            println!("Config file: {}", path.display());
            println!();
            println!("  Catalog:    {}", config.catalog_path().display());
            println!("  Output dir: {}", config.output_dir().display());
            println!("  Runtime:    {}", config.runtime());
            match config.timeout() {
                Ok(Some(t)) => println!("  Timeout:    {}", humantime::format_duration(t)),
                Ok(None) => println!("  Timeout:    none"),
                Err(e) => println!("  Timeout:    {} ({:#})", "invalid".red(), e),
            }

            if let Ok(templates) = config.templates() {
                println!();
                println!("Templates:");
                for engine in templates.engines() {
                    if let Some(t) = templates.get(&engine) {
                        println!("  {:<9} {} {} (.{})", engine.to_string(), t.program, t.args.join(" "), t.extension);
                    }
                }
            }
        }
        ConfigCommands::Validate => {
            let errors = config.validate();
            if errors.is_empty() {
                println!("{} Configuration is valid", "✓".green());
            } else {
                println!("{} Configuration errors:", "✗".red());
                for error in errors {
                    println!("  - {}", error);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
