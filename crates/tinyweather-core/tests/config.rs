use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;
use tinyweather_core::config::{Config, ConfigError, ErrorMode, Settings};
use tinyweather_core::logging::LogLevel;
use tinyweather_core::protocol::{MessageId, WireVersion};

const STATION_CONFIG: &str = "\
# Station on the first USB adapter
serial.baud=9600
serial.device=/dev/ttyUSB0
serial.timeout=3

log.level=info
log.file=/var/log/tinyweather.log

session.poll_interval=10
session.command=temp
session.heartbeat=yes
";

#[test]
fn test_values_round_trip_verbatim() {
    let text = "a.b=1\nc.d=  spaced  \ne.f=with=equals\n";
    let config = Config::parse(text).unwrap();

    assert_eq!(
        config.entries().collect::<Vec<_>>(),
        vec![("a.b", "1"), ("c.d", "  spaced  "), ("e.f", "with=equals")]
    );
}

#[test]
fn test_keys_are_whitespace_sensitive() {
    let plain = Config::parse("log.level=debug").unwrap();
    assert_eq!(plain.get("log.level"), Some("debug"));

    let padded_key = Config::parse("log.level =debug").unwrap();
    assert_eq!(padded_key.get("log.level"), None);
    assert_eq!(padded_key.get("log.level "), Some("debug"));

    let padded_value = Config::parse("log.level= debug").unwrap();
    assert_eq!(padded_value.get("log.level"), Some(" debug"));
    // Typed lookup ignores padding around the value
    assert_eq!(
        padded_value.get_log_level("log.level").unwrap(),
        LogLevel::Debug
    );
}

#[test]
fn test_last_assignment_wins() {
    let config = Config::parse("a.b=1\na.b=2").unwrap();
    assert_eq!(config.get_int("a.b").unwrap(), 2);
    assert_eq!(config.len(), 1);
}

#[test]
fn test_trailing_comment_stripped() {
    let config = Config::parse("serial.baud=9600 # comment").unwrap();
    assert_eq!(config.get("serial.baud"), Some("9600 "));
    assert_eq!(config.get_int("serial.baud").unwrap(), 9600);
}

#[test]
fn test_missing_required_key() {
    let config = Config::parse("serial.baud=9600").unwrap();
    match Settings::from_config(&config) {
        Err(ConfigError::MissingKey { key }) => assert_eq!(key, "serial.device"),
        other => panic!("expected MissingKey, got {:?}", other),
    }
}

#[test]
fn test_invalid_value_reported() {
    let config = Config::parse("serial.baud=fast\nserial.device=/dev/ttyUSB0").unwrap();
    let err = Settings::from_config(&config).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "serial.baud"));
    assert!(err.to_string().contains("serial.baud"));
}

#[test]
fn test_collect_all_reports_every_line() {
    let text = "good.key=1\nno equals here\n=value\na..b=2\n";
    let err = Config::parse_with(text, ErrorMode::CollectAll).unwrap_err();
    let lines: Vec<usize> = err.parse_errors().iter().map(|e| e.line).collect();
    assert_eq!(lines, vec![2, 3, 4]);

    let err = Config::parse(text).unwrap_err();
    assert_eq!(err.parse_errors().len(), 1);
}

#[test]
fn test_settings_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(STATION_CONFIG.as_bytes()).unwrap();

    let config = Config::load(file.path()).unwrap();
    let settings = Settings::from_config(&config).unwrap();

    assert_eq!(settings.serial.device, "/dev/ttyUSB0");
    assert_eq!(settings.serial.baud, 9600);
    assert_eq!(settings.serial.timeout, Duration::from_secs(3));
    assert_eq!(settings.log.level, LogLevel::Info);
    assert_eq!(
        settings.log.file.as_deref(),
        Some(std::path::Path::new("/var/log/tinyweather.log"))
    );
    assert_eq!(settings.session.poll_interval, Duration::from_secs(10));
    assert_eq!(settings.session.command, MessageId::CmdTemp);
    assert!(settings.session.heartbeat);
    // Defaults for everything not set
    assert_eq!(settings.session.retries, 5);
    assert_eq!(settings.session.backoff_max, Duration::from_secs(60));
    assert_eq!(settings.session.wire_version, WireVersion::V1);
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_parse_error_names_source_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "serial.baud=9600").unwrap();
    writeln!(file, "garbage").unwrap();

    let err = Config::load(file.path()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains(&file.path().display().to_string()));
    assert!(message.contains("line 2"));
}
