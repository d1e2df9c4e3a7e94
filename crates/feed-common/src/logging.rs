//! Logging configuration and initialization
//!
//! Centralized tracing setup for the Feed daemon and CLI. Supports console
//! and daily-rotated file output in text or JSON form, configured from the
//! environment. Components log through the `tracing` macros only; stage
//! transitions carry `namespace`/`objid` fields so one volume's ingest can
//! be followed across workers.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Minimum level to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Where log records go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" => Ok(LogOutput::Both),
            _ => Err(anyhow::anyhow!("Invalid log output: {}", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum level to display
    pub level: LogLevel,
    /// Output target
    pub output: LogOutput,
    /// Emit JSON records instead of text
    pub json: bool,
    /// Directory for log files (used when output includes file)
    pub log_dir: PathBuf,
    /// Log file prefix, e.g. "feedd" -> "feedd.2026-08-02.log"
    pub log_file_prefix: String,
    /// Extra filter directives, e.g. "sqlx=warn"
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            json: false,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "feed".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Load from environment variables
    ///
    /// `FEED_LOG_LEVEL`, `FEED_LOG_OUTPUT`, `FEED_LOG_JSON`, `FEED_LOG_DIR`,
    /// `FEED_LOG_PREFIX`, `FEED_LOG_FILTER`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("FEED_LOG_LEVEL") {
            config.level = level.parse()?;
        }
        if let Ok(output) = std::env::var("FEED_LOG_OUTPUT") {
            config.output = output.parse()?;
        }
        if let Ok(json) = std::env::var("FEED_LOG_JSON") {
            config.json = json.parse().unwrap_or(false);
        }
        if let Ok(dir) = std::env::var("FEED_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("FEED_LOG_PREFIX") {
            config.log_file_prefix = prefix;
        }
        if let Ok(filter) = std::env::var("FEED_LOG_FILTER") {
            config.filter_directives = Some(filter);
        }

        Ok(config)
    }

    /// Console-only config at the given level, used by the CLI
    pub fn console(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let mut filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',') {
            filter = filter.add_directive(
                directive
                    .parse()
                    .context("Failed to parse filter directive")?,
            );
        }
    }

    let registry = tracing_subscriber::registry().with(filter);

    let mut layers: Vec<Box<dyn Layer<_> + Send + Sync>> = Vec::new();

    match config.output {
        LogOutput::Console => {
            let layer = fmt::layer().with_writer(std::io::stdout);
            if config.json {
                layers.push(Box::new(layer.json()));
            } else {
                layers.push(Box::new(layer));
            }
        }
        LogOutput::File => {
            let layer = fmt::layer()
                .with_writer(file_writer(config)?)
                .with_ansi(false);
            if config.json {
                layers.push(Box::new(layer.json()));
            } else {
                layers.push(Box::new(layer));
            }
        }
        LogOutput::Both => {
            let console = fmt::layer().with_writer(std::io::stdout);
            let file = fmt::layer()
                .with_writer(file_writer(config)?)
                .with_ansi(false);
            if config.json {
                layers.push(Box::new(console.json()));
                layers.push(Box::new(file.json()));
            } else {
                layers.push(Box::new(console));
                layers.push(Box::new(file));
            }
        }
    }

    registry.with(layers).try_init()?;

    Ok(())
}

/// Build a non-blocking daily-rotating file writer.
///
/// The appender guard must live for the process lifetime, so it is
/// intentionally leaked here.
fn file_writer(config: &LogConfig) -> Result<tracing_appender::non_blocking::NonBlocking> {
    std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

    let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    std::mem::forget(guard);

    Ok(non_blocking)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_output_from_str() {
        assert_eq!("stdout".parse::<LogOutput>().unwrap(), LogOutput::Console);
        assert_eq!("both".parse::<LogOutput>().unwrap(), LogOutput::Both);
        assert!("syslog".parse::<LogOutput>().is_err());
    }

    #[test]
    fn test_console_config() {
        let config = LogConfig::console(LogLevel::Debug);
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.output, LogOutput::Console);
        assert!(!config.json);
    }
}
