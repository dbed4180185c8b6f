//! Wire formats
//!
//! A wire format knows how to find the boundaries of one frame and check
//! its integrity. The decoder only relies on the [`WireFormat`] trait, so the
//! station's framing can change version without touching the session code.
//!
//! Station v1 (the station firmware's transport):
//!
//! ```text
//! [ 0x7f ][ type ][ len ][ payload ... ][ crc lo ][ crc hi ][ 0xfe ]
//! ```
//!
//! - type: 0x44 data, 0x43 control
//! - len: payload length, 8 bits, at most 80
//! - crc: CRC-16/XMODEM of the payload only, little-endian

use serde::Serialize;

use super::packet::StationV2;
use super::DecodeError;

pub(crate) const FRAME_TYPE_DATA: u8 = 0x44;
pub(crate) const FRAME_TYPE_CTRL: u8 = 0x43;

/// Frame type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Commands and telemetry
    Data,
    /// Transport-level ACK/NACK/heartbeat
    Control,
}

impl FrameKind {
    /// Type byte on the wire
    pub fn to_byte(self) -> u8 {
        match self {
            FrameKind::Data => FRAME_TYPE_DATA,
            FrameKind::Control => FRAME_TYPE_CTRL,
        }
    }

    /// Parse a type byte
    pub fn from_byte(b: u8) -> Result<Self, DecodeError> {
        match b {
            FRAME_TYPE_DATA => Ok(FrameKind::Data),
            FRAME_TYPE_CTRL => Ok(FrameKind::Control),
            other => Err(DecodeError::UnknownFrameType(other)),
        }
    }
}

/// How a frame's integrity was verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "algorithm", content = "value", rename_all = "snake_case")]
pub enum Integrity {
    /// CRC-16/XMODEM, v1 frames
    Crc16(u16),
    /// CRC-32 (IEEE), v2 frames
    Crc32(u32),
}

/// Supported wire format versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WireVersion {
    /// [`StationV1`] framing
    V1,
    /// [`StationV2`] framing
    V2,
}

impl WireVersion {
    /// Instantiate the format for this version
    pub fn format(self) -> Box<dyn WireFormat> {
        match self {
            WireVersion::V1 => Box::new(StationV1),
            WireVersion::V2 => Box::new(StationV2),
        }
    }
}

/// Result of inspecting a buffer that begins with a start marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// More bytes are needed
    Incomplete,
    /// The bytes at the start marker cannot be a valid frame
    Invalid(DecodeError),
    /// A verified frame
    Complete(RawFrame),
}

/// A verified frame, before its payload is interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Frame type
    pub kind: FrameKind,
    /// Payload bytes, checksum verified
    pub payload: Vec<u8>,
    /// Total bytes on the wire, markers included
    pub len: usize,
    /// Checksum the frame carried
    pub integrity: Integrity,
}

/// A versioned frame layout
pub trait WireFormat: Send + Sync {
    /// Format version
    fn version(&self) -> WireVersion;

    /// Byte that begins every frame
    fn start_marker(&self) -> u8;

    /// Largest payload the format can carry
    fn max_payload(&self) -> usize;

    /// Bytes of framing around the payload
    fn overhead(&self) -> usize;

    /// Inspect `buf`, whose first byte is the start marker
    fn scan(&self, buf: &[u8]) -> Scan;

    /// Wrap `payload` into a complete frame
    fn encode(&self, kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>, DecodeError>;

    /// Largest complete frame
    fn max_frame_len(&self) -> usize {
        self.max_payload() + self.overhead()
    }
}

/// Station v1 framing with CRC-16/XMODEM
#[derive(Debug, Clone, Copy, Default)]
pub struct StationV1;

impl StationV1 {
    /// Start marker
    pub const START: u8 = 0x7f;
    /// End marker
    pub const END: u8 = 0xfe;
    /// Largest payload the one-byte length allows here
    pub const MAX_PAYLOAD: usize = 80;
    const HEADER: usize = 3;
    const TRAILER: usize = 3;
}

impl WireFormat for StationV1 {
    fn version(&self) -> WireVersion {
        WireVersion::V1
    }

    fn start_marker(&self) -> u8 {
        Self::START
    }

    fn max_payload(&self) -> usize {
        Self::MAX_PAYLOAD
    }

    fn overhead(&self) -> usize {
        Self::HEADER + Self::TRAILER
    }

    fn scan(&self, buf: &[u8]) -> Scan {
        let kind = match buf.get(1).map(|b| FrameKind::from_byte(*b)) {
            Some(Ok(kind)) => kind,
            Some(Err(e)) => return Scan::Invalid(e),
            None => return Scan::Incomplete,
        };
        if buf.len() < Self::HEADER {
            return Scan::Incomplete;
        }

        let len = buf[2] as usize;
        if len > Self::MAX_PAYLOAD {
            return Scan::Invalid(DecodeError::Oversize {
                len,
                max: Self::MAX_PAYLOAD,
            });
        }

        let total = Self::HEADER + len + Self::TRAILER;
        if buf.len() < total {
            return Scan::Incomplete;
        }

        let end = buf[total - 1];
        if end != Self::END {
            return Scan::Invalid(DecodeError::BadEndMarker { found: end });
        }

        let payload = &buf[Self::HEADER..Self::HEADER + len];
        let received = u16::from_le_bytes([buf[Self::HEADER + len], buf[Self::HEADER + len + 1]]);
        let expected = crc16(payload);
        if received != expected {
            return Scan::Invalid(DecodeError::ChecksumMismatch {
                expected: expected as u32,
                actual: received as u32,
            });
        }

        Scan::Complete(RawFrame {
            kind,
            payload: payload.to_vec(),
            len: total,
            integrity: Integrity::Crc16(received),
        })
    }

    fn encode(&self, kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
        if payload.len() > Self::MAX_PAYLOAD {
            return Err(DecodeError::Oversize {
                len: payload.len(),
                max: Self::MAX_PAYLOAD,
            });
        }

        let mut frame = Vec::with_capacity(payload.len() + self.overhead());
        frame.push(Self::START);
        frame.push(kind.to_byte());
        frame.push(payload.len() as u8);
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&crc16(payload).to_le_bytes());
        frame.push(Self::END);
        Ok(frame)
    }
}

/// CRC-16/XMODEM (poly 0x1021, init 0)
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
