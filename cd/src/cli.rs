//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// Conductor - pull-based process dispatch for remote worker fleets
#[derive(Parser)]
#[command(
    name = "cdr",
    about = "Dispatch queued processes to polling workers, autoscale pools, resume waiting processes",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Shorthand for --log-level DEBUG
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Effective CLI log level: explicit `--log-level` first, then `-v`
    pub fn effective_log_level(&self) -> Option<&str> {
        match (&self.log_level, self.verbose) {
            (Some(level), _) => Some(level.as_str()),
            (None, true) => Some("DEBUG"),
            (None, false) => None,
        }
    }
}

/// Storage selection shared by the subcommands that touch the queue
#[derive(Debug, Clone, Default, clap::Args)]
pub struct StoreArgs {
    /// SQLite database file (overrides storage.path)
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Use a throwaway in-memory store
    #[arg(long, conflicts_with = "db")]
    pub memory: bool,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator until SIGINT/SIGTERM
    Serve {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Add a process to the queue
    Enqueue {
        /// Requirement map as JSON, e.g. '{"agent":{"flavor":"gpu-.*"}}'
        #[arg(short, long)]
        requirements: Option<String>,

        /// Process payload as JSON
        #[arg(short, long)]
        payload: Option<String>,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// List queue entries by status
    Queue {
        /// Status to list (enqueued, starting, running, suspended, ...)
        #[arg(short, long, default_value = "enqueued")]
        status: String,

        /// Maximum entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Compute a pool's target size from observed numbers
    Scale {
        /// Usable workers in the pool now
        #[arg(long)]
        current: u32,

        /// Queue entries matching the pool
        #[arg(long)]
        queue: u32,

        /// Pool whose configured knobs to use (defaults when absent)
        #[arg(long)]
        pool: Option<String>,

        /// Override percent-increment
        #[arg(long)]
        percent_increment: Option<f64>,

        /// Override percent-decrement
        #[arg(long)]
        percent_decrement: Option<f64>,

        /// Override min-pool-size
        #[arg(long)]
        min_pool_size: Option<u32>,

        /// Override max-pool-size
        #[arg(long)]
        max_pool_size: Option<u32>,
    },

    /// Print the effective configuration
    Config {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conductor")
        .join("logs")
        .join("conductor.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Footer for `--help`
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();
    help.push_str("Config is read from --config, ./.conductor.yml or ");
    match dirs::config_dir() {
        Some(dir) => help.push_str(&format!("{}\n", dir.join("conductor").join("conductor.yml").display())),
        None => help.push_str("~/.config/conductor/conductor.yml\n"),
    }
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for listing commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let cli = Cli::parse_from(["cdr", "serve", "--memory"]);
        assert!(matches!(
            cli.command,
            Command::Serve {
                store: StoreArgs { memory: true, db: None }
            }
        ));
    }

    #[test]
    fn test_cli_parse_scale() {
        let cli = Cli::parse_from(["cdr", "scale", "--current", "3", "--queue", "10", "--max-pool-size", "4"]);
        if let Command::Scale {
            current,
            queue,
            max_pool_size,
            pool,
            ..
        } = cli.command
        {
            assert_eq!(current, 3);
            assert_eq!(queue, 10);
            assert_eq!(max_pool_size, Some(4));
            assert!(pool.is_none());
        } else {
            panic!("Expected Scale command");
        }
    }

    #[test]
    fn test_cli_memory_conflicts_with_db() {
        assert!(Cli::try_parse_from(["cdr", "queue", "--memory", "--db", "x.db"]).is_err());
    }

    #[test]
    fn test_verbose_sets_debug() {
        let cli = Cli::parse_from(["cdr", "-v", "config"]);
        assert_eq!(cli.effective_log_level(), Some("DEBUG"));

        let cli = Cli::parse_from(["cdr", "-v", "--log-level", "warn", "config"]);
        assert_eq!(cli.effective_log_level(), Some("warn"));
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["cdr", "-c", "/path/to/config.yml", "config"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("TEXT".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("table".parse::<OutputFormat>().is_err());
    }
}
