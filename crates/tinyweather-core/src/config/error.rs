//! Error types for config parsing and lookup

use std::fmt;
use thiserror::Error;

/// A single malformed line in a config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line number
    pub line: usize,
    /// Raw line content, exactly as read
    pub content: String,
    /// What was wrong with it
    pub reason: &'static str,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {:?}", self.line, self.reason, self.content)
    }
}

impl std::error::Error for ParseError {}

/// Errors produced while loading, parsing or reading the config.
///
/// All of these are fatal at startup: the controller reports them and exits
/// before entering the session loop.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Cannot read config '{path}': {source}")]
    Io {
        /// File that was being read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// One or more malformed lines
    #[error("{}", format_parse_errors(.source_name, .errors))]
    Parse {
        /// File path, or a label for in-memory content
        source_name: String,
        /// Every malformed line found
        errors: Vec<ParseError>,
    },

    /// A required key is absent
    #[error("Missing required config key '{key}'")]
    MissingKey {
        /// Dotted key name
        key: String,
    },

    /// A value does not convert to the type its key needs
    #[error("Invalid value {value:?} for '{key}': expected {expected}")]
    InvalidValue {
        /// Dotted key name
        key: String,
        /// Raw value as written
        value: String,
        /// Human-readable description of what is accepted
        expected: &'static str,
    },
}

impl ConfigError {
    /// Line errors if this is a parse failure, empty otherwise
    pub fn parse_errors(&self) -> &[ParseError] {
        match self {
            ConfigError::Parse { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn format_parse_errors(source_name: &str, errors: &[ParseError]) -> String {
    let mut out = format!("Malformed config '{}'", source_name);
    for e in errors {
        out.push_str("\n  ");
        out.push_str(&e.to_string());
    }
    out
}
