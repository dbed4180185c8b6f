//! Decode errors

use thiserror::Error;

/// Errors raised while turning received bytes into frames.
///
/// All of these are recoverable: the offending bytes are discarded and the
/// decoder resynchronizes on the next start marker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Bytes with no usable start marker
    #[error("Discarded {skipped} bytes before the next start marker")]
    Garbage {
        /// Number of bytes dropped
        skipped: usize,
    },

    /// Frame checksum does not match its contents
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over the received frame
        expected: u32,
        /// Checksum carried by the frame
        actual: u32,
    },

    /// Frame does not end with the end marker
    #[error("Bad end marker: {found:#04x}")]
    BadEndMarker {
        /// Byte found where the end marker belongs
        found: u8,
    },

    /// Declared payload length is over the format's limit
    #[error("Frame oversize: {len} byte payload exceeds {max}")]
    Oversize {
        /// Declared payload length
        len: usize,
        /// Largest payload the format allows
        max: usize,
    },

    /// Frame type byte is neither data nor control
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    /// Data frame with an unassigned message id
    #[error("Unknown message id: {0:#04x}")]
    UnknownMessage(u8),

    /// Control frame with an unassigned code
    #[error("Unknown control code: {0:#04x}")]
    UnknownControl(u8),

    /// Payload size does not fit the message id
    #[error("Payload length for {id:#04x}: expected {expected}, got {actual}")]
    PayloadLength {
        /// Message id byte
        id: u8,
        /// Length the message requires
        expected: usize,
        /// Length received
        actual: usize,
    },
}
