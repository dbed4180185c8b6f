//! Station v2 packet framing
//!
//! Larger payloads and a CRC32 trailer for stations that batch readings.
//!
//! Packet format:
//! - 1 byte: start marker `0x7e`
//! - 1 byte: frame type (same codes as v1)
//! - 2 bytes: payload length (big-endian)
//! - N bytes: payload
//! - 4 bytes: CRC32 (of payload only, big-endian)
//! - 1 byte: end marker `0xfe`

use byteorder::{BigEndian, ByteOrder};
use crc32fast::Hasher;

use super::format::{FrameKind, Integrity, RawFrame, Scan, WireFormat, WireVersion};
use super::DecodeError;

/// Station v2 framing with CRC32
#[derive(Debug, Clone, Copy, Default)]
pub struct StationV2;

impl StationV2 {
    /// Start marker, distinct from v1
    pub const START: u8 = 0x7e;
    /// End marker
    pub const END: u8 = 0xfe;
    /// Largest payload accepted
    pub const MAX_PAYLOAD: usize = 1024;
    const HEADER: usize = 4;
    const TRAILER: usize = 5;
}

impl WireFormat for StationV2 {
    fn version(&self) -> WireVersion {
        WireVersion::V2
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

        // Read length
        let length = BigEndian::read_u16(&buf[2..4]) as usize;

        // Validate length
        if length > Self::MAX_PAYLOAD {
            return Scan::Invalid(DecodeError::Oversize {
                len: length,
                max: Self::MAX_PAYLOAD,
            });
        }

        let total = Self::HEADER + length + Self::TRAILER;
        if buf.len() < total {
            return Scan::Incomplete;
        }

        let end = buf[total - 1];
        if end != Self::END {
            return Scan::Invalid(DecodeError::BadEndMarker { found: end });
        }

        // Extract payload
        let payload = &buf[Self::HEADER..Self::HEADER + length];

        // Read CRC
        let crc_at = Self::HEADER + length;
        let received_crc = BigEndian::read_u32(&buf[crc_at..crc_at + 4]);
        let expected_crc = crc32(payload);

        // Verify CRC
        if received_crc != expected_crc {
            return Scan::Invalid(DecodeError::ChecksumMismatch {
                expected: expected_crc,
                actual: received_crc,
            });
        }

        Scan::Complete(RawFrame {
            kind,
            payload: payload.to_vec(),
            len: total,
            integrity: Integrity::Crc32(received_crc),
        })
    }

    fn encode(&self, kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
        if payload.len() > Self::MAX_PAYLOAD {
            return Err(DecodeError::Oversize {
                len: payload.len(),
                max: Self::MAX_PAYLOAD,
            });
        }

        let mut bytes = Vec::with_capacity(payload.len() + self.overhead());
        bytes.push(Self::START);
        bytes.push(kind.to_byte());

        // Length (2 bytes, big-endian)
        let mut len_bytes = [0u8; 2];
        BigEndian::write_u16(&mut len_bytes, payload.len() as u16);
        bytes.extend_from_slice(&len_bytes);

        bytes.extend_from_slice(payload);

        // CRC (4 bytes, big-endian)
        let mut crc_bytes = [0u8; 4];
        BigEndian::write_u32(&mut crc_bytes, crc32(payload));
        bytes.extend_from_slice(&crc_bytes);

        bytes.push(Self::END);
        Ok(bytes)
    }
}

fn crc32(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_layout() {
        let encoded = StationV2.encode(FrameKind::Data, &[0x02]).unwrap();
        assert_eq!(encoded.len(), 1 + StationV2.overhead());
        assert_eq!(&encoded[..4], &[0x7e, 0x44, 0x00, 0x01]);
        assert_eq!(*encoded.last().unwrap(), 0xfe);
    }

    #[test]
    fn test_large_payload_length_is_big_endian() {
        let payload = vec![0xaa; 300];
        let encoded = StationV2.encode(FrameKind::Data, &payload).unwrap();
        assert_eq!(&encoded[2..4], &[0x01, 0x2c]);

        match StationV2.scan(&encoded) {
            Scan::Complete(raw) => assert_eq!(raw.payload, payload),
            other => panic!("expected complete frame, got {:?}", other),
        }
    }

    #[test]
    fn test_crc_verification() {
        let mut encoded = StationV2.encode(FrameKind::Data, &[1, 2, 3, 4, 5]).unwrap();

        // Corrupt a byte
        encoded[5] ^= 0xFF;

        // Should fail CRC check
        assert!(matches!(
            StationV2.scan(&encoded),
            Scan::Invalid(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_oversize_length_field() {
        assert!(matches!(
            StationV2.scan(&[0x7e, 0x44, 0xff, 0xff]),
            Scan::Invalid(DecodeError::Oversize { .. })
        ));
    }
}
