//! # TinyWeather Core Library
//!
//! Core functionality for the TinyWeather controller.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Dot-notation config parsing with typed settings
//! - Serial link management with exclusive device ownership
//! - Station frame decoding with resynchronization on corruption
//! - The session state machine (connect, poll, decode, backoff)
//! - Telemetry sinks for decoded readings
//!
//! ## Example
//!
//! ```rust,ignore
//! use tinyweather_core::prelude::*;
//!
//! let config = Config::load("/etc/tinyweather/config")?;
//! let stop = StopSignal::new();
//! let (sink, mut readings) = ChannelSink::bounded(64);
//!
//! // Blocks until `stop.stop()` is called from elsewhere
//! tinyweather_core::run(&config, sink, stop)?;
//! ```

pub mod config;
pub mod logging;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod stop;

use config::{Config, ConfigError, Settings};
use serial::SerialPortChannel;
use session::{SessionController, TelemetrySink};
use stop::StopSignal;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, ConfigError, Settings};
    pub use crate::logging::{LogConfig, LogLevel};
    pub use crate::protocol::{Field, Frame, FrameDecoder, MessageId, WireVersion};
    pub use crate::serial::{ConnectionError, SerialChannel, SerialPortChannel};
    pub use crate::session::{
        ChannelSink, JsonLinesSink, SessionController, SessionHandle, SessionState, TelemetrySink,
    };
    pub use crate::stop::StopSignal;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run a session against the configured serial device until `stop` is
/// signalled.
///
/// Link failures are retried internally; only an invalid `config` is
/// returned as an error, before any I/O happens.
pub fn run<S: TelemetrySink>(config: &Config, sink: S, stop: StopSignal) -> Result<(), ConfigError> {
    let settings = Settings::from_config(config)?;
    let mut controller = SessionController::new(&settings, SerialPortChannel::new(), sink, stop);
    controller.run();
    Ok(())
}
