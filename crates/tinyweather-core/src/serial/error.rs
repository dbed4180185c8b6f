//! Connection errors

use thiserror::Error;

/// Errors on the serial link.
///
/// These are recoverable: the session controller faults, closes the link
/// and reconnects after a backoff delay.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// No such device
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Another link in this process holds the device
    #[error("Device busy: '{0}' is already open")]
    Busy(String),

    /// The OS refused to open or configure the port
    #[error("Cannot open '{device}': {reason}")]
    Open {
        /// Device path
        device: String,
        /// Error reported by the port layer
        reason: String,
    },

    /// No data before the read deadline
    #[error("Read timed out")]
    Timeout,

    /// The peer hung up, or the link was already closed
    #[error("Link closed")]
    Closed,

    /// The station never echoed a heartbeat
    #[error("No heartbeat from station after {attempts} attempts")]
    NoHeartbeat {
        /// Heartbeats sent
        attempts: u32,
    },

    /// Too many consecutive NACKs for one poll
    #[error("Station rejected the command {nacks} times")]
    Rejected {
        /// NACKs received
        nacks: u32,
    },

    /// The session was asked to stop
    #[error("Stopped")]
    Stopped,

    /// Any other port I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Raised while opening the device, as opposed to during I/O
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            ConnectionError::NotFound(_) | ConnectionError::Busy(_) | ConnectionError::Open { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_errors() {
        assert!(ConnectionError::Busy("/dev/ttyUSB0".to_string()).is_open_error());
        assert!(ConnectionError::NotFound("/dev/ttyUSB0".to_string()).is_open_error());
        assert!(!ConnectionError::Timeout.is_open_error());
        assert!(!ConnectionError::Closed.is_open_error());
    }
}
