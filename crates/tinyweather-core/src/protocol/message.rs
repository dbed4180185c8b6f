//! Message payloads
//!
//! A data frame's payload starts with a message id. Commands go from the
//! controller to the station; responses come back with sensor fields in the
//! canonical order temperature, humidity, pressure, timestamp. All fields are
//! little-endian:
//!
//! | Field | Encoding | Unit |
//! |---|---|---|
//! | temperature | `i16` | 0.01 °C |
//! | humidity | `u16` | 0.01 %RH |
//! | pressure | `u32` | Pa |
//! | timestamp | `u32` | Unix seconds |
//!
//! Control frames carry a single [`ControlCode`] byte.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::format::{FrameKind, Integrity, RawFrame};
use super::DecodeError;

/// Message ids carried in the first payload byte of a data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageId {
    /// Restart the station
    CmdReset,
    /// Request temperature, humidity and pressure
    CmdTph,
    /// Request temperature only
    CmdTemp,
    /// Request pressure only
    CmdPress,
    /// Request humidity only
    CmdHum,
    /// Temperature, humidity and pressure reading
    RspTph,
    /// Temperature reading
    RspTemp,
    /// Pressure reading
    RspPress,
    /// Humidity reading
    RspHum,
}

impl MessageId {
    /// Id byte on the wire
    pub fn to_byte(self) -> u8 {
        match self {
            MessageId::CmdReset => 0x01,
            MessageId::CmdTph => 0x02,
            MessageId::CmdTemp => 0x03,
            MessageId::CmdPress => 0x04,
            MessageId::CmdHum => 0x05,
            MessageId::RspTph => 0x06,
            MessageId::RspTemp => 0x07,
            MessageId::RspPress => 0x08,
            MessageId::RspHum => 0x09,
        }
    }

    /// Parse an id byte
    pub fn from_byte(b: u8) -> Result<Self, DecodeError> {
        match b {
            0x01 => Ok(MessageId::CmdReset),
            0x02 => Ok(MessageId::CmdTph),
            0x03 => Ok(MessageId::CmdTemp),
            0x04 => Ok(MessageId::CmdPress),
            0x05 => Ok(MessageId::CmdHum),
            0x06 => Ok(MessageId::RspTph),
            0x07 => Ok(MessageId::RspTemp),
            0x08 => Ok(MessageId::RspPress),
            0x09 => Ok(MessageId::RspHum),
            other => Err(DecodeError::UnknownMessage(other)),
        }
    }

    /// Poll command for a `session.command` name
    pub fn from_command_name(name: &str) -> Option<Self> {
        match name {
            "tph" => Some(MessageId::CmdTph),
            "temp" => Some(MessageId::CmdTemp),
            "press" => Some(MessageId::CmdPress),
            "hum" => Some(MessageId::CmdHum),
            _ => None,
        }
    }

    /// Carries telemetry fields
    pub fn is_response(self) -> bool {
        self.response_layout().is_some()
    }

    /// Which sensor fields a response carries (temperature, humidity, pressure)
    fn response_layout(self) -> Option<(bool, bool, bool)> {
        match self {
            MessageId::RspTph => Some((true, true, true)),
            MessageId::RspTemp => Some((true, false, false)),
            MessageId::RspPress => Some((false, false, true)),
            MessageId::RspHum => Some((false, true, false)),
            _ => None,
        }
    }

    /// The response a station answers this command with
    pub fn expected_response(self) -> Option<Self> {
        match self {
            MessageId::CmdTph => Some(MessageId::RspTph),
            MessageId::CmdTemp => Some(MessageId::RspTemp),
            MessageId::CmdPress => Some(MessageId::RspPress),
            MessageId::CmdHum => Some(MessageId::RspHum),
            _ => None,
        }
    }
}

/// Transport-level control codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCode {
    /// Frame received
    Ack,
    /// NACK: checksum mismatch
    CrcFail,
    /// NACK: payload too long
    Oversize,
    /// NACK: any other framing or payload error
    InvalidFrame,
    /// Liveness check, echoed by the station
    Heartbeat,
}

impl ControlCode {
    /// Code byte on the wire
    pub fn to_byte(self) -> u8 {
        match self {
            ControlCode::Ack => 0x01,
            ControlCode::CrcFail => 0x02,
            ControlCode::Oversize => 0x03,
            ControlCode::InvalidFrame => 0x04,
            ControlCode::Heartbeat => 0x05,
        }
    }

    /// Parse a code byte
    pub fn from_byte(b: u8) -> Result<Self, DecodeError> {
        match b {
            0x01 => Ok(ControlCode::Ack),
            0x02 => Ok(ControlCode::CrcFail),
            0x03 => Ok(ControlCode::Oversize),
            0x04 => Ok(ControlCode::InvalidFrame),
            0x05 => Ok(ControlCode::Heartbeat),
            other => Err(DecodeError::UnknownControl(other)),
        }
    }

    /// NACK codes report a failed transfer
    pub fn is_nack(self) -> bool {
        matches!(
            self,
            ControlCode::CrcFail | ControlCode::Oversize | ControlCode::InvalidFrame
        )
    }

    /// NACK to answer a decode failure with
    pub fn nack_for(err: &DecodeError) -> Self {
        match err {
            DecodeError::ChecksumMismatch { .. } => ControlCode::CrcFail,
            DecodeError::Oversize { .. } => ControlCode::Oversize,
            _ => ControlCode::InvalidFrame,
        }
    }
}

/// What a frame is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FrameTag {
    /// Data frame
    Message(MessageId),
    /// Control frame
    Control(ControlCode),
}

/// One typed telemetry field
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum Field {
    /// Degrees Celsius
    Temperature(f64),
    /// Percent relative humidity
    Humidity(f64),
    /// Hectopascal
    Pressure(f64),
    /// Station clock at sampling time
    Timestamp(DateTime<Utc>),
}

/// A decoded frame. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    tag: FrameTag,
    fields: Vec<Field>,
    raw_len: usize,
    integrity: Integrity,
}

impl Frame {
    /// Interpret a verified raw frame
    pub fn from_raw(raw: RawFrame) -> Result<Self, DecodeError> {
        let (tag, fields) = match raw.kind {
            FrameKind::Control => {
                let code = match raw.payload.as_slice() {
                    [b] => ControlCode::from_byte(*b)?,
                    other => {
                        return Err(DecodeError::PayloadLength {
                            id: FrameKind::Control.to_byte(),
                            expected: 1,
                            actual: other.len(),
                        })
                    }
                };
                (FrameTag::Control(code), Vec::new())
            }
            FrameKind::Data => {
                let (&first, body) = raw
                    .payload
                    .split_first()
                    .ok_or(DecodeError::PayloadLength {
                        id: FrameKind::Data.to_byte(),
                        expected: 1,
                        actual: 0,
                    })?;
                let id = MessageId::from_byte(first)?;
                (FrameTag::Message(id), decode_fields(id, body)?)
            }
        };

        Ok(Self {
            tag,
            fields,
            raw_len: raw.len,
            integrity: raw.integrity,
        })
    }

    /// Message id or control code
    pub fn tag(&self) -> FrameTag {
        self.tag
    }

    /// Fields in canonical order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Bytes this frame occupied on the wire
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Checksum the frame was verified with
    pub fn integrity(&self) -> Integrity {
        self.integrity
    }

    /// Telemetry response (as opposed to a command echo or control frame)
    pub fn is_reading(&self) -> bool {
        matches!(self.tag, FrameTag::Message(id) if id.is_response())
    }

    /// Control code, for control frames
    pub fn control(&self) -> Option<ControlCode> {
        match self.tag {
            FrameTag::Control(code) => Some(code),
            FrameTag::Message(_) => None,
        }
    }

    /// Degrees Celsius, if the frame carries it
    pub fn temperature(&self) -> Option<f64> {
        self.fields.iter().find_map(|f| match f {
            Field::Temperature(v) => Some(*v),
            _ => None,
        })
    }

    /// Percent relative humidity, if carried
    pub fn humidity(&self) -> Option<f64> {
        self.fields.iter().find_map(|f| match f {
            Field::Humidity(v) => Some(*v),
            _ => None,
        })
    }

    /// Hectopascal, if carried
    pub fn pressure(&self) -> Option<f64> {
        self.fields.iter().find_map(|f| match f {
            Field::Pressure(v) => Some(*v),
            _ => None,
        })
    }

    /// Station sampling time, if carried
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.fields.iter().find_map(|f| match f {
            Field::Timestamp(t) => Some(*t),
            _ => None,
        })
    }
}

fn decode_fields(id: MessageId, body: &[u8]) -> Result<Vec<Field>, DecodeError> {
    let Some((temp, hum, press)) = id.response_layout() else {
        // Commands carry no fields
        if !body.is_empty() {
            return Err(DecodeError::PayloadLength {
                id: id.to_byte(),
                expected: 1,
                actual: body.len() + 1,
            });
        }
        return Ok(Vec::new());
    };

    let expected = 2 * temp as usize + 2 * hum as usize + 4 * press as usize + 4;
    if body.len() != expected {
        return Err(DecodeError::PayloadLength {
            id: id.to_byte(),
            expected: expected + 1,
            actual: body.len() + 1,
        });
    }

    let mut fields = Vec::with_capacity(4);
    let mut at = 0;
    if temp {
        let centi = LittleEndian::read_i16(&body[at..at + 2]);
        fields.push(Field::Temperature(centi as f64 / 100.0));
        at += 2;
    }
    if hum {
        let centi = LittleEndian::read_u16(&body[at..at + 2]);
        fields.push(Field::Humidity(centi as f64 / 100.0));
        at += 2;
    }
    if press {
        let pa = LittleEndian::read_u32(&body[at..at + 4]);
        fields.push(Field::Pressure(pa as f64 / 100.0));
        at += 4;
    }
    let secs = LittleEndian::read_u32(&body[at..at + 4]);
    // Any u32 is a valid Unix time
    let ts = Utc
        .timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_default();
    fields.push(Field::Timestamp(ts));

    Ok(fields)
}

/// Payload for a command frame
pub fn command_payload(id: MessageId) -> Vec<u8> {
    vec![id.to_byte()]
}

/// Payload for a control frame
pub fn control_payload(code: ControlCode) -> Vec<u8> {
    vec![code.to_byte()]
}

/// Sensor values a station reports, used to build response payloads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Degrees Celsius
    pub temperature: f64,
    /// Percent relative humidity
    pub humidity: f64,
    /// Hectopascal
    pub pressure: f64,
    /// Unix seconds
    pub timestamp: u32,
}

impl Reading {
    /// Encode as the payload of response `id` (station side of the protocol)
    pub fn to_payload(&self, id: MessageId) -> Option<Vec<u8>> {
        let (temp, hum, press) = id.response_layout()?;
        let mut out = vec![id.to_byte()];
        let mut buf = [0u8; 4];
        if temp {
            LittleEndian::write_i16(&mut buf, (self.temperature * 100.0).round() as i16);
            out.extend_from_slice(&buf[..2]);
        }
        if hum {
            LittleEndian::write_u16(&mut buf, (self.humidity * 100.0).round() as u16);
            out.extend_from_slice(&buf[..2]);
        }
        if press {
            LittleEndian::write_u32(&mut buf, (self.pressure * 100.0).round() as u32);
            out.extend_from_slice(&buf);
        }
        LittleEndian::write_u32(&mut buf, self.timestamp);
        out.extend_from_slice(&buf);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(kind: FrameKind, payload: Vec<u8>) -> RawFrame {
        let len = payload.len() + 6;
        RawFrame {
            kind,
            payload,
            len,
            integrity: Integrity::Crc16(0),
        }
    }

    fn sample() -> Reading {
        Reading {
            temperature: -4.25,
            humidity: 61.5,
            pressure: 1013.25,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_msgid_from_byte() {
        for b in 0x01..=0x09u8 {
            assert_eq!(MessageId::from_byte(b).unwrap().to_byte(), b);
        }
        assert_eq!(
            MessageId::from_byte(0x45),
            Err(DecodeError::UnknownMessage(0x45))
        );
    }

    #[test]
    fn test_tph_fields_in_canonical_order() {
        let payload = sample().to_payload(MessageId::RspTph).unwrap();
        assert_eq!(payload.len(), 13);

        let frame = Frame::from_raw(raw(FrameKind::Data, payload)).unwrap();
        assert_eq!(frame.tag(), FrameTag::Message(MessageId::RspTph));
        assert!(frame.is_reading());
        assert_eq!(
            frame.fields(),
            &[
                Field::Temperature(-4.25),
                Field::Humidity(61.5),
                Field::Pressure(1013.25),
                Field::Timestamp(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
            ]
        );
    }

    #[test]
    fn test_single_sensor_responses() {
        let frame =
            Frame::from_raw(raw(FrameKind::Data, sample().to_payload(MessageId::RspHum).unwrap()))
                .unwrap();
        assert_eq!(frame.humidity(), Some(61.5));
        assert_eq!(frame.temperature(), None);
        assert_eq!(frame.fields().len(), 2);

        let frame = Frame::from_raw(raw(
            FrameKind::Data,
            sample().to_payload(MessageId::RspPress).unwrap(),
        ))
        .unwrap();
        assert_eq!(frame.pressure(), Some(1013.25));
    }

    #[test]
    fn test_wrong_payload_length() {
        let mut payload = sample().to_payload(MessageId::RspTemp).unwrap();
        payload.pop();
        assert_eq!(
            Frame::from_raw(raw(FrameKind::Data, payload)),
            Err(DecodeError::PayloadLength {
                id: 0x07,
                expected: 7,
                actual: 6,
            })
        );
    }

    #[test]
    fn test_control_frames() {
        let frame = Frame::from_raw(raw(FrameKind::Control, vec![0x05])).unwrap();
        assert_eq!(frame.control(), Some(ControlCode::Heartbeat));
        assert!(!frame.is_reading());
        assert!(frame.fields().is_empty());

        assert_eq!(
            Frame::from_raw(raw(FrameKind::Control, vec![0x09])),
            Err(DecodeError::UnknownControl(0x09))
        );
        assert!(ControlCode::CrcFail.is_nack());
        assert!(!ControlCode::Ack.is_nack());
    }

    #[test]
    fn test_command_frame_has_no_fields() {
        let frame = Frame::from_raw(raw(FrameKind::Data, command_payload(MessageId::CmdTph)))
            .unwrap();
        assert!(!frame.is_reading());
        assert_eq!(MessageId::CmdTph.expected_response(), Some(MessageId::RspTph));
    }

    #[test]
    fn test_frame_serializes_to_json() {
        let frame =
            Frame::from_raw(raw(FrameKind::Data, sample().to_payload(MessageId::RspTemp).unwrap()))
                .unwrap();
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["tag"]["kind"], "message");
        assert_eq!(json["tag"]["id"], "rsp_temp");
        assert_eq!(json["fields"][0]["field"], "temperature");
        assert_eq!(json["fields"][0]["value"], -4.25);
        assert_eq!(json["integrity"]["algorithm"], "crc16");
    }
}
