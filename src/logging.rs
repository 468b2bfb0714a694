//! Structured logging via `tracing`.
//!
//! Configurable level, format (text/json), and destination
//! (stdout/stderr/file combinations), with `MAESTRO_LOG*` environment
//! overrides taking precedence over the config file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid logging configuration: {0}")]
    Invalid(String),

    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Whether logging is enabled (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level: trace, debug, info, warn, error, off.
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format: json, text.
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file, file+stderr, both.
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path when output includes file.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Module-specific log levels.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            level: default_level(),
            format: default_format(),
            output: default_output(),
            file: None,
            modules: HashMap::new(),
        }
    }
}

/// Initialize the logging system.
///
/// Priority: `MAESTRO_LOG*` environment variables, then the supplied config,
/// then defaults.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), LoggingError> {
    if config.map(|c| !c.enabled).unwrap_or(false) {
        Registry::default()
            .with(EnvFilter::new("off"))
            .with(fmt::layer().with_writer(std::io::sink))
            .init();
        return Ok(());
    }

    let filter = build_env_filter(config)?;
    let format = determine("MAESTRO_LOG_FORMAT", config.map(|c| c.format.as_str()), "text");
    if format != "json" && format != "text" {
        return Err(LoggingError::Invalid(format!(
            "format must be 'json' or 'text', got '{}'",
            format
        )));
    }
    let output = determine("MAESTRO_LOG_OUTPUT", config.map(|c| c.output.as_str()), "stderr");
    let writer = make_writer(&output, config.and_then(|c| c.file.clone()))?;

    let base = Registry::default().with(filter);
    if format == "json" {
        base.with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_writer(writer),
        )
        .init();
    } else {
        base.with(
            fmt::layer()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_writer(writer),
        )
        .init();
    }
    Ok(())
}

fn determine(env_key: &str, configured: Option<&str>, fallback: &str) -> String {
    if let Ok(value) = std::env::var(env_key) {
        if !value.is_empty() {
            return value;
        }
    }
    configured.unwrap_or(fallback).to_string()
}

fn make_writer(output: &str, file: Option<PathBuf>) -> Result<BoxMakeWriter, LoggingError> {
    let open_file = |path: Option<PathBuf>| -> Result<std::fs::File, LoggingError> {
        let path = match std::env::var("MAESTRO_LOG_FILE") {
            Ok(env_path) if !env_path.is_empty() => PathBuf::from(env_path),
            _ => path.or_else(default_log_file).ok_or_else(|| {
                LoggingError::Invalid("log file path not set and no default available".into())
            })?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?)
    };

    match output {
        "stdout" => Ok(BoxMakeWriter::new(std::io::stdout)),
        "stderr" => Ok(BoxMakeWriter::new(std::io::stderr)),
        "both" => Ok(BoxMakeWriter::new(std::io::stdout.and(std::io::stderr))),
        "file" => Ok(BoxMakeWriter::new(std::sync::Arc::new(open_file(file)?))),
        "file+stderr" => Ok(BoxMakeWriter::new(
            std::sync::Arc::new(open_file(file)?).and(std::io::stderr),
        )),
        other => Err(LoggingError::Invalid(format!(
            "output must be 'stdout', 'stderr', 'file', 'file+stderr', or 'both', got '{}'",
            other
        ))),
    }
}

fn default_log_file() -> Option<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "maestro", "maestro")?;
    let state = dirs.state_dir()?.to_path_buf();
    Some(state.join("maestro.log"))
}

fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_env("MAESTRO_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    let mut filter = EnvFilter::new(level);
    if let Some(config) = config {
        for (module, module_level) in &config.modules {
            let directive = format!("{}={}", module, module_level);
            filter = filter.add_directive(directive.parse().map_err(|e| {
                LoggingError::Invalid(format!("invalid log directive '{}': {}", directive, e))
            })?);
        }
    }
    Ok(filter)
}
