//! Controller configuration
//!
//! Parses the dot-notation config file:
//!
//! ```text
//! # Serial link to the station
//! serial.baud=9600
//! serial.device=/dev/ttyUSB0   # trailing comments are allowed
//! log.level=info
//! ```
//!
//! Keys and values are stored verbatim (see [`parser`] for the exact
//! tokenization rules). Typed accessors convert lazily on lookup and ignore
//! surrounding whitespace of the raw value; [`Config::get`] and
//! [`Config::get_string`] never trim.

mod error;
mod parser;
mod settings;

pub use error::{ConfigError, ParseError};
pub use settings::{keys, SerialSettings, SessionSettings, Settings, MAX_DURATION};

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::logging::LogLevel;
use parser::{parse_line, Line};

/// How to treat malformed lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Stop at the first malformed line
    #[default]
    FailFast,
    /// Report every malformed line
    CollectAll,
}

/// A parsed config file, immutable once loaded
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Keys in order of first appearance
    order: Vec<String>,
    /// Current value per key
    map: HashMap<String, String>,
}

impl Config {
    /// Parse config text, failing on the first malformed line
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Self::parse_with(text, ErrorMode::FailFast)
    }

    /// Parse config text with an explicit error mode
    pub fn parse_with(text: &str, mode: ErrorMode) -> Result<Self, ConfigError> {
        Self::parse_named(text, "<text>", mode)
    }

    /// Read and parse a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_named(&text, &path.display().to_string(), ErrorMode::FailFast)
    }

    fn parse_named(text: &str, source_name: &str, mode: ErrorMode) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        let mut errors = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            match parse_line(raw) {
                Ok(Line::Blank) | Ok(Line::Comment) => {}
                Ok(Line::Assign { key, value }) => config.assign(key, value),
                Err(reason) => {
                    errors.push(ParseError {
                        line: idx + 1,
                        content: raw.to_string(),
                        reason,
                    });
                    if mode == ErrorMode::FailFast {
                        break;
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Parse {
                source_name: source_name.to_string(),
                errors,
            })
        }
    }

    /// Later assignments shadow earlier ones; `None` removes the key.
    fn assign(&mut self, key: String, value: Option<String>) {
        match value {
            Some(value) => {
                if !self.map.contains_key(&key) {
                    self.order.push(key.clone());
                }
                self.map.insert(key, value);
            }
            None => {
                if self.map.remove(&key).is_some() {
                    self.order.retain(|k| k != &key);
                }
            }
        }
    }

    /// Raw value for an exact (whitespace-sensitive) key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Check if a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All keys in order of first appearance
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// All entries in order of first appearance
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(move |k| (k.as_str(), self.map[k].as_str()))
    }

    /// Entries below `prefix`, with the prefix and its dot removed.
    ///
    /// `section("serial")` yields `("baud", "9600")` for `serial.baud=9600`.
    pub fn section<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.entries().filter_map(move |(k, v)| {
            k.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|rest| (rest, v))
        })
    }

    fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingKey {
            key: key.to_string(),
        })
    }

    /// Required string value, verbatim
    pub fn get_string(&self, key: &str) -> Result<&str, ConfigError> {
        self.require(key)
    }

    /// Required integer value
    pub fn get_int(&self, key: &str) -> Result<i64, ConfigError> {
        convert(key, self.require(key)?, "an integer", |s| s.parse().ok())
    }

    /// Integer value, or `default` when absent
    pub fn get_int_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get(key) {
            Some(_) => self.get_int(key),
            None => Ok(default),
        }
    }

    /// Required duration given in whole seconds
    pub fn get_duration(&self, key: &str) -> Result<Duration, ConfigError> {
        convert(key, self.require(key)?, "a non-negative number of seconds", |s| {
            s.parse::<u64>().ok().map(Duration::from_secs)
        })
    }

    /// Duration in seconds, or `default` when absent
    pub fn get_duration_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key) {
            Some(_) => self.get_duration(key),
            None => Ok(default),
        }
    }

    /// Required log level
    pub fn get_log_level(&self, key: &str) -> Result<LogLevel, ConfigError> {
        convert(key, self.require(key)?, "one of error, warn, info, debug", |s| {
            s.parse().ok()
        })
    }

    /// Log level, or `default` when absent
    pub fn get_log_level_or(&self, key: &str, default: LogLevel) -> Result<LogLevel, ConfigError> {
        match self.get(key) {
            Some(_) => self.get_log_level(key),
            None => Ok(default),
        }
    }

    /// Required boolean (true/false, yes/no, on/off, 1/0)
    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        convert(key, self.require(key)?, "a boolean", |s| {
            match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            }
        })
    }

    /// Boolean, or `default` when absent
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some(_) => self.get_bool(key),
            None => Ok(default),
        }
    }
}

/// Run `parse` on the trimmed raw value, mapping failure to `InvalidValue`
fn convert<T>(
    key: &str,
    raw: &str,
    expected: &'static str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    parse(raw.trim()).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        expected,
    })
}
