//! Logging setup
//!
//! The core only emits `tracing` events. Where they go is decided once at
//! startup by handing an explicit [`LogConfig`] to [`init`].

use std::fmt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt as tfmt, prelude::*, util::TryInitError, EnvFilter};

/// Verbosity accepted by `log.level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Failures only
    Error,
    /// Faults and rejected frames
    Warn,
    /// State transitions
    Info,
    /// Everything, including each reading
    #[default]
    Debug,
}

impl LogLevel {
    /// Name as written in the config
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized level name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLevel;

impl FromStr for LogLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            _ => Err(UnknownLevel),
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Where and how verbosely to log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig {
    /// Maximum level emitted (unless `RUST_LOG` overrides it)
    pub level: LogLevel,
    /// Append to this file instead of writing to stderr
    pub file: Option<PathBuf>,
}

/// Errors installing the subscriber
#[derive(Error, Debug)]
pub enum LoggingError {
    /// The log file could not be opened for appending
    #[error("Cannot open log file '{path}': {source}")]
    OpenFile {
        /// Configured log file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Build the level filter: `RUST_LOG` wins, otherwise `config.level`.
fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from(config.level).into())
        .from_env_lossy()
}

/// Install the global `tracing` subscriber described by `config`.
///
/// Can only succeed once per process.
pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = env_filter(config);

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::OpenFile {
                    path: path.clone(),
                    source,
                })?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tfmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false),
                )
                .try_init()?;
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tfmt::layer().with_writer(std::io::stderr))
                .try_init()?;
        }
    }

    Ok(())
}
