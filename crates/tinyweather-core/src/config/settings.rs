//! Typed view of the recognized config keys
//!
//! Building [`Settings`] is where required keys are enforced. The controller
//! does this once at startup; any error is fatal.

use std::path::PathBuf;
use std::time::Duration;

use super::{Config, ConfigError};
use crate::logging::{LogConfig, LogLevel};
use crate::protocol::{MessageId, WireVersion};

/// Recognized config keys
pub mod keys {
    /// Baud rate (required)
    pub const SERIAL_BAUD: &str = "serial.baud";
    /// Device path (required)
    pub const SERIAL_DEVICE: &str = "serial.device";
    /// Read timeout in seconds, 0 for none
    pub const SERIAL_TIMEOUT: &str = "serial.timeout";
    /// Log file, appended to
    pub const LOG_FILE: &str = "log.file";
    /// One of error, warn, info, debug
    pub const LOG_LEVEL: &str = "log.level";
    /// Seconds between readings
    pub const SESSION_POLL_INTERVAL: &str = "session.poll_interval";
    /// First reconnect delay in seconds
    pub const SESSION_BACKOFF_INITIAL: &str = "session.backoff_initial";
    /// Reconnect delay cap in seconds
    pub const SESSION_BACKOFF_MAX: &str = "session.backoff_max";
    /// Heartbeat attempts and tolerated NACKs
    pub const SESSION_RETRIES: &str = "session.retries";
    /// Heartbeat handshake on connect
    pub const SESSION_HEARTBEAT: &str = "session.heartbeat";
    /// Poll command: tph, temp, press or hum
    pub const SESSION_COMMAND: &str = "session.command";
    /// Wire version, 1 or 2
    pub const FRAME_VERSION: &str = "frame.version";
}

/// Longest accepted timeout, poll interval or backoff delay
pub const MAX_DURATION: Duration = Duration::from_secs(86_400);

/// Serial link parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Device path (e.g. "/dev/ttyUSB0" or "/dev/rfcomm0")
    pub device: String,
    /// Baud rate
    pub baud: u32,
    /// Read timeout; zero blocks indefinitely
    pub timeout: Duration,
}

/// Control loop policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Wait between a decoded reading and the next poll
    pub poll_interval: Duration,
    /// First reconnect delay after a fault
    pub backoff_initial: Duration,
    /// Reconnect delay cap
    pub backoff_max: Duration,
    /// Heartbeat attempts, and consecutive NACKs tolerated per poll
    pub retries: u32,
    /// Confirm the station with a heartbeat exchange after opening
    pub heartbeat: bool,
    /// Command sent to request telemetry
    pub command: MessageId,
    /// Frame layout spoken on the wire
    pub wire_version: WireVersion,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            retries: 5,
            heartbeat: false,
            command: MessageId::CmdTph,
            wire_version: WireVersion::V1,
        }
    }
}

/// Everything the controller needs, validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Serial link parameters
    pub serial: SerialSettings,
    /// Control loop policy
    pub session: SessionSettings,
    /// Logging setup
    pub log: LogConfig,
}

impl Settings {
    /// Validate `config` and convert every recognized key
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let baud = config.get_int(keys::SERIAL_BAUD)?;
        let baud = u32::try_from(baud)
            .ok()
            .filter(|b| *b > 0)
            .ok_or_else(|| invalid(config, keys::SERIAL_BAUD, "a positive baud rate"))?;

        let serial = SerialSettings {
            device: config.get_string(keys::SERIAL_DEVICE)?.to_string(),
            baud,
            timeout: bounded_duration(config, keys::SERIAL_TIMEOUT, Duration::ZERO)?,
        };

        let log = LogConfig {
            level: config.get_log_level_or(keys::LOG_LEVEL, LogLevel::Debug)?,
            file: config.get(keys::LOG_FILE).map(PathBuf::from),
        };

        let defaults = SessionSettings::default();
        let retries = config.get_int_or(keys::SESSION_RETRIES, defaults.retries as i64)?;
        let retries = u32::try_from(retries)
            .ok()
            .filter(|r| *r > 0)
            .ok_or_else(|| invalid(config, keys::SESSION_RETRIES, "a positive integer"))?;

        let command = match config.get(keys::SESSION_COMMAND) {
            None => defaults.command,
            Some(raw) => MessageId::from_command_name(raw.trim()).ok_or_else(|| {
                invalid(config, keys::SESSION_COMMAND, "one of tph, temp, press, hum")
            })?,
        };

        let wire_version = match config.get_int_or(keys::FRAME_VERSION, 1)? {
            1 => WireVersion::V1,
            2 => WireVersion::V2,
            _ => return Err(invalid(config, keys::FRAME_VERSION, "1 or 2")),
        };

        let session = SessionSettings {
            poll_interval: bounded_duration(
                config,
                keys::SESSION_POLL_INTERVAL,
                defaults.poll_interval,
            )?,
            backoff_initial: bounded_duration(
                config,
                keys::SESSION_BACKOFF_INITIAL,
                defaults.backoff_initial,
            )?,
            backoff_max: bounded_duration(config, keys::SESSION_BACKOFF_MAX, defaults.backoff_max)?,
            retries,
            heartbeat: config.get_bool_or(keys::SESSION_HEARTBEAT, defaults.heartbeat)?,
            command,
            wire_version,
        };

        Ok(Self {
            serial,
            session,
            log,
        })
    }
}

fn bounded_duration(
    config: &Config,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let duration = config.get_duration_or(key, default)?;
    if duration > MAX_DURATION {
        return Err(invalid(config, key, "at most 86400 seconds"));
    }
    Ok(duration)
}

fn invalid(config: &Config, key: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: config.get(key).unwrap_or_default().to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse("serial.baud=9600\nserial.device=/dev/fake0").unwrap();
        let settings = Settings::from_config(&config).unwrap();

        assert_eq!(
            settings.serial,
            SerialSettings {
                device: "/dev/fake0".to_string(),
                baud: 9600,
                timeout: Duration::ZERO,
            }
        );
        assert_eq!(settings.log, LogConfig::default());
        assert_eq!(settings.session, SessionSettings::default());
    }

    #[test]
    fn test_full_config() {
        let content = "\
serial.baud=115200
serial.device=/dev/rfcomm0
serial.timeout=3
log.level=warn
log.file=/var/log/tinyweather.log
session.poll_interval=10
session.backoff_initial=2
session.backoff_max=30
session.retries=3
session.heartbeat=true
session.command=temp
frame.version=2
";
        let settings = Settings::from_config(&Config::parse(content).unwrap()).unwrap();
        assert_eq!(settings.serial.timeout, Duration::from_secs(3));
        assert_eq!(settings.log.level, LogLevel::Warn);
        assert_eq!(
            settings.log.file,
            Some(PathBuf::from("/var/log/tinyweather.log"))
        );
        assert_eq!(settings.session.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.session.retries, 3);
        assert!(settings.session.heartbeat);
        assert_eq!(settings.session.command, MessageId::CmdTemp);
        assert_eq!(settings.session.wire_version, WireVersion::V2);
    }

    #[test]
    fn test_missing_device_is_fatal() {
        let config = Config::parse("serial.baud=9600").unwrap();
        match Settings::from_config(&config) {
            Err(ConfigError::MissingKey { key }) => assert_eq!(key, keys::SERIAL_DEVICE),
            other => panic!("expected MissingKey, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_values() {
        for bad in [
            "serial.baud=0",
            "serial.baud=-9600",
            "session.retries=0",
            "session.command=wind",
            "frame.version=3",
            "log.level=verbose",
            "serial.timeout=86401",
            "serial.timeout=18446744073709551615",
            "session.poll_interval=100000",
            "session.backoff_initial=18446744073709551615",
            "session.backoff_max=18446744073709551615",
        ] {
            let content = format!("serial.baud=9600\nserial.device=/dev/x\n{}", bad);
            let config = Config::parse(&content).unwrap();
            assert!(
                matches!(
                    Settings::from_config(&config),
                    Err(ConfigError::InvalidValue { .. })
                ),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_duration_upper_bound() {
        let config = Config::parse(
            "serial.baud=9600\nserial.device=/dev/x\nserial.timeout=86400\nsession.backoff_max=86400",
        )
        .unwrap();
        let settings = Settings::from_config(&config).unwrap();
        assert_eq!(settings.serial.timeout, MAX_DURATION);
        assert_eq!(settings.session.backoff_max, MAX_DURATION);

        let config = Config::parse(
            "serial.baud=9600\nserial.device=/dev/x\nserial.timeout=18446744073709551615",
        )
        .unwrap();
        match Settings::from_config(&config) {
            Err(ConfigError::InvalidValue { key, value, .. }) => {
                assert_eq!(key, keys::SERIAL_TIMEOUT);
                assert_eq!(value, "18446744073709551615");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }
}
