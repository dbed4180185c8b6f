//! Stream decoder
//!
//! Turns an arbitrary split of received bytes into frames. Bytes are fed as
//! they arrive; each [`FrameDecoder::feed`] yields the frames completed so
//! far and keeps any trailing partial frame for the next call.
//!
//! Corruption never poisons the stream: the decoder drops the bad bytes,
//! reports one [`DecodeError`] per contiguous discarded run, and resumes at
//! the next start marker. A run is reported when the next frame completes,
//! or when the caller declares the line quiet with [`FrameDecoder::flush`],
//! so the number of errors does not depend on how reads split the bytes.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use super::format::{FrameKind, Scan, WireFormat, WireVersion};
use super::message::{command_payload, control_payload, ControlCode, Frame, MessageId};
use super::DecodeError;

/// Running totals, for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames decoded successfully
    pub frames: u64,
    /// Decode errors reported
    pub errors: u64,
    /// Bytes dropped while resynchronizing
    pub bytes_discarded: u64,
}

/// Stateful frame decoder
pub struct FrameDecoder {
    format: Box<dyn WireFormat>,
    buf: Vec<u8>,
    /// Bytes dropped since the last reported error
    skipped: usize,
    /// First specific cause seen in the current discarded run
    cause: Option<DecodeError>,
    /// Item held back while the discarded run before it is reported
    ready: Option<Result<Frame, DecodeError>>,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Decoder for an arbitrary wire format
    pub fn new(format: Box<dyn WireFormat>) -> Self {
        let capacity = format.max_frame_len();
        Self {
            format,
            buf: Vec::with_capacity(capacity),
            skipped: 0,
            cause: None,
            ready: None,
            stats: DecoderStats::default(),
        }
    }

    /// Decoder for a given wire version
    pub fn for_version(version: WireVersion) -> Self {
        Self::new(version.format())
    }

    /// Wire version this decoder speaks
    pub fn version(&self) -> WireVersion {
        self.format.version()
    }

    /// Totals since construction; [`FrameDecoder::reset`] keeps them
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes held for an incomplete frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether bytes were dropped that no error has covered yet
    pub fn has_pending_error(&self) -> bool {
        self.skipped > 0
    }

    /// The line went quiet: nothing buffered can complete any more.
    ///
    /// Drops the buffered bytes and reports the discarded run they end, if
    /// any. Call it only after the last [`FrameDecoder::feed`] iterator was
    /// drained, since frames not yet yielded are dropped too.
    pub fn flush(&mut self) -> Option<DecodeError> {
        self.ready = None;
        let n = self.buf.len();
        if n > 0 {
            self.discard(n, None);
        }
        self.take_discard_error()
    }

    /// Drop all buffered state (after the link is reopened)
    pub fn reset(&mut self) {
        self.buf.clear();
        self.skipped = 0;
        self.cause = None;
        self.ready = None;
    }

    /// Append `bytes` and iterate over whatever they complete.
    ///
    /// Decoding happens lazily as the iterator is advanced. Anything not
    /// consumed stays buffered and is picked up by the next call, so
    /// `feed(&[])` drains frames left over from an earlier call.
    pub fn feed(&mut self, bytes: &[u8]) -> Decoded<'_> {
        self.buf.extend_from_slice(bytes);
        Decoded { decoder: self }
    }

    /// Encode a data frame carrying a command
    pub fn encode_command(&self, id: MessageId) -> Result<Vec<u8>, DecodeError> {
        self.format.encode(FrameKind::Data, &command_payload(id))
    }

    /// Encode a control frame
    pub fn encode_control(&self, code: ControlCode) -> Result<Vec<u8>, DecodeError> {
        self.format.encode(FrameKind::Control, &control_payload(code))
    }

    /// Encode an arbitrary payload
    pub fn encode(&self, kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
        self.format.encode(kind, payload)
    }

    fn discard(&mut self, n: usize, cause: Option<DecodeError>) {
        self.buf.drain(..n);
        self.skipped += n;
        self.stats.bytes_discarded += n as u64;
        if self.cause.is_none() {
            self.cause = cause;
        }
    }

    /// Report the pending discarded run, if any
    fn take_discard_error(&mut self) -> Option<DecodeError> {
        if self.skipped == 0 {
            return None;
        }
        let skipped = std::mem::take(&mut self.skipped);
        let err = self
            .cause
            .take()
            .unwrap_or(DecodeError::Garbage { skipped });
        debug!(skipped, error = %err, "resynchronized frame stream");
        self.stats.errors += 1;
        Some(err)
    }

    /// Offset of a later start marker that begins a complete, valid frame
    fn later_valid_start(&self) -> Option<usize> {
        let start = self.format.start_marker();
        (1..self.buf.len())
            .filter(|&i| self.buf[i] == start)
            .find(|&i| matches!(self.format.scan(&self.buf[i..]), Scan::Complete(_)))
    }

    fn next_item(&mut self) -> Option<Result<Frame, DecodeError>> {
        if let Some(item) = self.ready.take() {
            return Some(item);
        }

        let start = self.format.start_marker();
        loop {
            match self.buf.iter().position(|&b| b == start) {
                None => {
                    // The run may continue in the next read
                    let n = self.buf.len();
                    self.discard(n, None);
                    return None;
                }
                Some(0) => {}
                Some(p) => self.discard(p, None),
            }

            match self.format.scan(&self.buf) {
                Scan::Complete(raw) => {
                    self.buf.drain(..raw.len);
                    let item = Frame::from_raw(raw);
                    match &item {
                        Ok(frame) => {
                            self.stats.frames += 1;
                            trace!(tag = ?frame.tag(), len = frame.raw_len(), "frame decoded");
                        }
                        Err(_) => self.stats.errors += 1,
                    }
                    return match self.take_discard_error() {
                        Some(err) => {
                            self.ready = Some(item);
                            Some(Err(err))
                        }
                        None => Some(item),
                    };
                }
                Scan::Invalid(err) => {
                    // Drop the false start marker and rescan
                    self.discard(1, Some(err));
                }
                Scan::Incomplete => {
                    if let Some(p) = self.later_valid_start() {
                        self.discard(p, None);
                        continue;
                    }
                    if self.buf.len() >= self.format.max_frame_len() {
                        self.discard(1, None);
                        continue;
                    }
                    return None;
                }
            }
        }
    }
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("version", &self.format.version())
            .field("buffered", &self.buf.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Lazy sequence of decode results for one [`FrameDecoder::feed`] call
pub struct Decoded<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Decoded<'_> {
    type Item = Result<Frame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_item()
    }
}

/// `tokio_util` codec over a [`FrameDecoder`], for framed async streams.
///
/// Decode errors are yielded as items rather than codec errors so a single
/// bad frame does not terminate the stream.
#[derive(Debug)]
pub struct StationCodec {
    decoder: FrameDecoder,
}

impl StationCodec {
    /// Codec speaking `version`
    pub fn new(version: WireVersion) -> Self {
        Self {
            decoder: FrameDecoder::for_version(version),
        }
    }
}

impl Decoder for StationCodec {
    type Item = Result<Frame, DecodeError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let chunk = src.split();
        Ok(self.decoder.feed(&chunk).next())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        Ok(self.decoder.flush().map(Err))
    }
}

/// Outgoing frame for [`StationCodec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outgoing {
    /// Data frame carrying a command
    Command(MessageId),
    /// Control frame
    Control(ControlCode),
}

impl Encoder<Outgoing> for StationCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Outgoing, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = match item {
            Outgoing::Command(id) => self.decoder.encode_command(id),
            Outgoing::Control(code) => self.decoder.encode_control(code),
        }
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
