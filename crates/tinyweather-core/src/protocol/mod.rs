//! Station Protocol
//!
//! Framing, integrity checks and payload decoding for the serial link
//! between the controller and the station.
//!
//! Every exchange is a frame. Data frames carry a command or a telemetry
//! response; control frames acknowledge (ACK), reject (NACK) or check
//! (heartbeat) the link. The byte layout of a frame is versioned behind
//! [`WireFormat`]; see [`StationV1`] and [`StationV2`].

mod decoder;
mod error;
mod format;
mod message;
mod packet;

pub use decoder::{DecoderStats, Decoded, FrameDecoder, Outgoing, StationCodec};
pub use error::DecodeError;
pub use format::{crc16, FrameKind, Integrity, RawFrame, Scan, StationV1, WireFormat, WireVersion};
pub use message::{
    command_payload, control_payload, ControlCode, Field, Frame, FrameTag, MessageId, Reading,
};
pub use packet::StationV2;
