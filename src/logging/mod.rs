//! ## Sets up logging by reading configuration from environment variables.
//!
//! Environment variables used:
//! - LOG_MODE: "stdout" (default) or "file"
//! - LOG_LEVEL: log level ("trace", "debug", "info", "warn", "error"); default is "info".
//!   `RUST_LOG`, when set, takes precedence and accepts full filter directives.
//! - LOG_FORMAT: "compact" (default), "pretty" or "json"
//! - LOG_DATA_DIR: when using file mode, the directory of the log file (default "./logs")

use chrono::Utc;
use eyre::WrapErr;
use std::{
    env,
    fs::{create_dir_all, File},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::constants::{
    DEFAULT_LOG_DIR, DEFAULT_LOG_FORMAT, DEFAULT_LOG_LEVEL, DEFAULT_LOG_MODE, LOG_FILE_NAME,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub mode: String,
    pub level: String,
    pub format: LogFormat,
    pub log_dir: PathBuf,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            mode: env::var("LOG_MODE").unwrap_or_else(|_| DEFAULT_LOG_MODE.to_string()),
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
            format: LogFormat::parse(
                &env::var("LOG_FORMAT").unwrap_or_else(|_| DEFAULT_LOG_FORMAT.to_string()),
            ),
            log_dir: PathBuf::from(
                env::var("LOG_DATA_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string()),
            ),
        }
    }

    pub fn is_file_mode(&self) -> bool {
        self.mode.eq_ignore_ascii_case("file")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_directive(&self.level)))
    }
}

/// Unknown levels fall back to info.
fn level_directive(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => DEFAULT_LOG_LEVEL,
    }
}

/// `queue-worker.log` -> `queue-worker-2024-05-01.log`
fn dated_file_path(dir: &Path, file_name: &str, date: &str) -> PathBuf {
    let rolled = match file_name.strip_suffix(".log") {
        Some(stem) => format!("{stem}-{date}.log"),
        None => format!("{file_name}-{date}.log"),
    };
    dir.join(rolled)
}

/// Installs the global tracing subscriber.
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn setup_logging() -> eyre::Result<()> {
    let config = LoggingConfig::from_env();

    let installed = if config.is_file_mode() {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let path = dated_file_path(&config.log_dir, LOG_FILE_NAME, &date);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = File::create(&path)
            .wrap_err_with(|| format!("Unable to create log file {}", path.display()))?;
        let builder = tracing_subscriber::fmt()
            .with_env_filter(config.filter())
            .with_ansi(false)
            .with_writer(Mutex::new(file));
        match config.format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
            LogFormat::Compact => builder.compact().try_init(),
        }
    } else {
        let builder = tracing_subscriber::fmt().with_env_filter(config.filter());
        match config.format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
            LogFormat::Compact => builder.compact().try_init(),
        }
    };

    if installed.is_ok() {
        info!(mode = %config.mode, level = %config.level, "Logging is successfully configured");
    }
    Ok(())
}
