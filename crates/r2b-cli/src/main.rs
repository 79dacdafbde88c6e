//! R2B CLI - buffer keyed text records and write them out as batched blobs.

use anyhow::Result;
use clap::{Parser, Subcommand};
use r2b_core::config::{LogFormat, LogLevel};
use r2b_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, bad override, failed validation)
    ConfigError = 1,
    /// Record source error (unreadable input file, invalid UTF-8)
    SourceError = 2,
    /// Storage error (S3, filesystem, unsupported location)
    StorageError = 3,
    /// Health endpoint unreachable or reporting unhealthy
    HealthCheckError = 6,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Map an error to an exit code, preferring the typed core error.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(core) = error.downcast_ref::<r2b_core::Error>() {
            return match core {
                r2b_core::Error::Config(_) => ExitCode::ConfigError,
                r2b_core::Error::Source(_) => ExitCode::SourceError,
                r2b_core::Error::Sink(_) => ExitCode::StorageError,
                r2b_core::Error::Io(_) => ExitCode::RuntimeError,
            };
        }

        let error_str = error.to_string().to_lowercase();

        if error_str.contains("config") || error_str.contains("toml") || error_str.contains("parse")
        {
            ExitCode::ConfigError
        } else if error_str.contains("storage")
            || error_str.contains("s3")
            || error_str.contains("object_store")
        {
            ExitCode::StorageError
        } else if error_str.contains("health") {
            ExitCode::HealthCheckError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "r2b")]
#[command(about = "Buffer keyed records in memory and flush them to blob storage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to ./config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion engine
    Ingest {
        /// Read records from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Override buffer.flush_interval_seconds
        #[arg(long)]
        flush_interval_seconds: Option<u64>,

        /// Override buffer.max_lines_per_flush
        #[arg(long)]
        max_lines_per_flush: Option<usize>,

        /// Override storage.location (s3://bucket/prefix, memory://, or a directory)
        #[arg(long)]
        location: Option<String>,

        /// Do not start the health and metrics server
        #[arg(long)]
        no_server: bool,
    },

    /// Show status and health of a running ingester
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config file when it parses; the full
    // load (with validation) happens in the command itself.
    let (log_format, log_level) = config_path(&cli.config)
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| (config.monitoring.log_format, config.monitoring.log_level))
        .unwrap_or((LogFormat::Json, LogLevel::Info));

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(log_level.as_filter()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            input,
            flush_interval_seconds,
            max_lines_per_flush,
            location,
            no_server,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(seconds) = flush_interval_seconds {
                config.buffer.flush_interval_seconds = seconds;
            }
            if let Some(lines) = max_lines_per_flush {
                config.buffer.max_lines_per_flush = lines;
            }
            if let Some(location) = location {
                config.storage.location = location;
            }
            config.validate()?;

            commands::ingest::run(config, input, !no_server).await?;
        }

        Commands::Status { url } => {
            commands::status::run(&url).await?;
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate()?;
            println!("Configuration is valid");
            println!(
                "  flush every {}s or {} records, timer every {}s, storage {}",
                config.buffer.flush_interval_seconds,
                config.buffer.max_lines_per_flush,
                config.buffer.timer_interval_seconds,
                config.storage.location
            );
        }
    }

    Ok(())
}

const DEFAULT_CONFIG: &str = "config.toml";

/// Explicit path, else `config.toml` if it exists.
fn config_path(path: &Option<PathBuf>) -> Option<PathBuf> {
    match path {
        Some(path) => Some(path.clone()),
        None => Some(PathBuf::from(DEFAULT_CONFIG)).filter(|p| p.exists()),
    }
}

/// Load the config file (or defaults) and apply environment overrides.
fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let config = match config_path(path) {
        Some(path) => read_config(&path)?,
        None => {
            let mut config = Config::default();
            config.apply_env_overrides()?;
            config
        }
    };
    Ok(config)
}

fn read_config(path: &Path) -> r2b_core::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        r2b_core::Error::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    let mut config: Config = toml::from_str(&content)?;
    config.apply_env_overrides()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_from_core_error() {
        let err = anyhow::Error::new(r2b_core::Error::Config("bad".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);

        let err = anyhow::Error::new(r2b_core::Error::Source("closed".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::SourceError);

        let err = anyhow::Error::new(r2b_core::Error::Sink(
            r2b_core::SinkError::InvalidLocation("ftp://x".into()),
        ));
        assert_eq!(ExitCode::from_error(&err), ExitCode::StorageError);
    }

    #[test]
    fn test_exit_code_from_message() {
        let err = anyhow::anyhow!("health endpoint unreachable");
        assert_eq!(ExitCode::from_error(&err), ExitCode::HealthCheckError);

        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_error(&err), ExitCode::RuntimeError);
    }

    #[test]
    fn test_read_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r2b.toml");
        std::fs::write(
            &path,
            "[buffer]\nmax_lines_per_flush = 50\n\n[storage]\nlocation = \"memory://\"\n",
        )
        .unwrap();

        let config = read_config(&path).unwrap();
        assert_eq!(config.buffer.max_lines_per_flush, 50);
        assert_eq!(config.storage.location, "memory://");
    }

    #[test]
    fn test_missing_explicit_config_is_config_error() {
        let result = read_config(Path::new("/nonexistent/r2b.toml"));
        assert!(matches!(result, Err(r2b_core::Error::Config(_))));
    }

    #[test]
    fn test_cli_parses_ingest_overrides() {
        let cli = Cli::try_parse_from([
            "r2b",
            "ingest",
            "--input",
            "records.txt",
            "--max-lines-per-flush",
            "10",
            "--flush-interval-seconds",
            "0",
            "--no-server",
        ])
        .unwrap();

        match cli.command {
            Commands::Ingest {
                input,
                max_lines_per_flush,
                flush_interval_seconds,
                no_server,
                ..
            } => {
                assert_eq!(input, Some(PathBuf::from("records.txt")));
                assert_eq!(max_lines_per_flush, Some(10));
                assert_eq!(flush_interval_seconds, Some(0));
                assert!(no_server);
            }
            _ => panic!("expected ingest"),
        }
    }
}
