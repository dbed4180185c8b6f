//! Telemetry sinks
//!
//! The controller hands every decoded reading to a [`TelemetrySink`] from
//! its control loop, so `accept` must return promptly.

use std::io::Write;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

use crate::protocol::Frame;

/// Consumer of decoded frames
pub trait TelemetrySink: Send {
    /// Take ownership of one decoded reading. Must not block.
    fn accept(&mut self, frame: Frame);
}

impl TelemetrySink for Vec<Frame> {
    fn accept(&mut self, frame: Frame) {
        self.push(frame);
    }
}

/// Forwards frames to a bounded channel.
///
/// A full channel drops the frame rather than stall the serial loop; drops
/// are counted.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
    dropped: u64,
}

impl ChannelSink {
    /// Sink with room for `capacity` undelivered frames, plus its receiver
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

    /// Frames dropped because the receiver was full or gone
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl TelemetrySink for ChannelSink {
    fn accept(&mut self, frame: Frame) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(dropped = self.dropped, "telemetry consumer lagging, frame dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped += 1;
                trace!("telemetry receiver closed, frame dropped");
            }
        }
    }
}

/// Writes each frame as one line of JSON
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    /// Sink writing to `out`
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write one frame, surfacing I/O errors
    pub fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, frame)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn accept(&mut self, frame: Frame) {
        if let Err(e) = self.write_frame(&frame) {
            warn!("failed to write telemetry: {}", e);
        }
    }
}
