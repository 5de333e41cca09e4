//! Conductor - process dispatch coordinator
//!
//! CLI entry point for serving the coordinator and inspecting its queue.

use std::fs;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result, eyre};
use serde_json::Value;
use tracing::{debug, info};

use conductor::autoscaler::{AutoscalerConfig, ScaleDirection, compute_target};
use conductor::cli::{Cli, Command, OutputFormat, StoreArgs, generate_after_help, get_log_path};
use conductor::config::{Config, StorageBackend};
use conductor::coordinator::{Coordinator, Stores};
use conductor::dispatcher::CompiledRequirements;
use conductor::domain::{NewEntry, ProcessStatus};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level / -v > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.effective_log_level(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { store } => {
            debug!("main: matched Serve command");
            cmd_serve(config, &store).await
        }
        Command::Enqueue {
            requirements,
            payload,
            store,
        } => {
            debug!("main: matched Enqueue command");
            cmd_enqueue(config, requirements.as_deref(), payload.as_deref(), &store).await
        }
        Command::Queue {
            status,
            limit,
            format,
            store,
        } => {
            debug!(%status, limit, %format, "main: matched Queue command");
            cmd_queue(config, &status, limit, format, &store).await
        }
        Command::Scale {
            current,
            queue,
            pool,
            percent_increment,
            percent_decrement,
            min_pool_size,
            max_pool_size,
        } => {
            debug!(current, queue, ?pool, "main: matched Scale command");
            let mut scaling = match &pool {
                Some(name) => config
                    .autoscaler
                    .pools
                    .get(name)
                    .cloned()
                    .ok_or_else(|| eyre!("Pool '{}' is not configured", name))?,
                None => AutoscalerConfig::default(),
            };
            if let Some(value) = percent_increment {
                scaling.percent_increment = value;
            }
            if let Some(value) = percent_decrement {
                scaling.percent_decrement = value;
            }
            if let Some(value) = min_pool_size {
                scaling.min_pool_size = value;
            }
            if max_pool_size.is_some() {
                scaling.max_pool_size = max_pool_size;
            }
            cmd_scale(current, queue, &scaling)
        }
        Command::Config { format } => {
            debug!(%format, "main: matched Config command");
            cmd_config(&config, format)
        }
    }
}

/// Open the stores, honouring `--db` / `--memory` over the config
fn open_stores(config: &mut Config, args: &StoreArgs) -> Result<Stores> {
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    } else if let Some(db) = &args.db {
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.path = db.clone();
    }
    Stores::open(&config.storage)
}

async fn cmd_serve(mut config: Config, args: &StoreArgs) -> Result<()> {
    let stores = open_stores(&mut config, args)?;
    info!(backend = ?config.storage.backend, "cmd_serve: stores opened");

    let mut handle = Coordinator::new(config.clone(), stores).start();
    println!(
        "{} conductor ({} pools, storage: {})",
        "Serving".green().bold(),
        config.autoscaler.pools.len(),
        match config.storage.backend {
            StorageBackend::Memory => "memory".to_string(),
            StorageBackend::Sqlite => config.storage.path.display().to_string(),
        }
    );

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => debug!("cmd_serve: SIGINT received, initiating shutdown"),
            _ = sigterm.recv() => debug!("cmd_serve: SIGTERM received, initiating shutdown"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        debug!("cmd_serve: Ctrl-C received, initiating shutdown");
    }

    handle.shutdown().await;
    println!("{}", "Stopped".yellow());
    Ok(())
}

fn parse_json(label: &str, raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(text) => serde_json::from_str(text).context(format!("Invalid {} JSON", label)),
        None => Ok(Value::Null),
    }
}

async fn cmd_enqueue(
    mut config: Config,
    requirements: Option<&str>,
    payload: Option<&str>,
    args: &StoreArgs,
) -> Result<()> {
    let requirements = parse_json("requirements", requirements)?;
    // Reject patterns that would never match before they reach the queue
    CompiledRequirements::compile(&requirements).context("Invalid requirements")?;
    let payload = parse_json("payload", payload)?;

    let stores = open_stores(&mut config, args)?;
    let entry = stores
        .queue
        .insert(NewEntry::new().with_requirements(requirements).with_payload(payload))
        .await
        .context("Failed to enqueue process")?;

    info!(key = %entry.key, seq = entry.seq_id, "cmd_enqueue: inserted");
    println!("{} {}", "Enqueued".green().bold(), entry.key.to_string().cyan());
    Ok(())
}

async fn cmd_queue(mut config: Config, status: &str, limit: usize, format: OutputFormat, args: &StoreArgs) -> Result<()> {
    let status: ProcessStatus = status.parse().map_err(|e: String| eyre!(e))?;
    let stores = open_stores(&mut config, args)?;
    let entries = stores
        .queue
        .list_by_status(status, limit)
        .await
        .context("Failed to list queue")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No {} processes", status.to_string().dimmed());
                return Ok(());
            }
            println!("{:<8} {:<38} {:<10} REQUIREMENTS", "SEQ", "PROCESS", "STATUS");
            for entry in &entries {
                let requirements = if entry.requirements.is_null() {
                    "-".to_string()
                } else {
                    entry.requirements.to_string()
                };
                println!(
                    "{:<8} {:<38} {:<10} {}",
                    entry.seq_id,
                    entry.key.to_string().cyan(),
                    entry.status.to_string().yellow(),
                    requirements
                );
            }
        }
    }
    Ok(())
}

fn cmd_scale(current: u32, queue: u32, scaling: &AutoscalerConfig) -> Result<()> {
    scaling.validate().map_err(|reason| eyre!(reason))?;
    let decision = compute_target(current, queue, scaling);
    let direction = match decision.direction {
        ScaleDirection::Up => decision.direction.to_string().green(),
        ScaleDirection::Down => decision.direction.to_string().red(),
        ScaleDirection::Hold => decision.direction.to_string().dimmed(),
    };
    println!(
        "current={} queue={} target={} ({})",
        current,
        queue,
        decision.target.to_string().bold(),
        direction
    );
    Ok(())
}

fn cmd_config(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", serde_yaml::to_string(config)?),
    }
    Ok(())
}
