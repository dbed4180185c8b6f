//! Session controller
//!
//! The control loop: open the device, poll the station, decode its response
//! and hand readings to the sink. Every failure on the link is recoverable;
//! the controller faults, waits out a backoff delay and reconnects.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::backoff::Backoff;
use super::sink::TelemetrySink;
use super::SessionState;
use crate::config::{SerialSettings, SessionSettings, Settings};
use crate::protocol::{ControlCode, DecodeError, Frame, FrameDecoder, FrameTag};
use crate::serial::{ConnectionError, SerialChannel, SerialLink};
use crate::stop::StopSignal;

const READ_CHUNK: usize = 256;

/// Heartbeat reply wait when the link timeout is infinite
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

/// Silence after which a partial or corrupt reply is given up on
pub const INTER_FRAME_GAP: Duration = Duration::from_millis(250);

/// What a frame received while awaiting a response led to
enum Handled {
    Pending,
    Resent,
    Dispatched,
}

/// Drives one station session
pub struct SessionController<C: SerialChannel, S: TelemetrySink> {
    serial: SerialSettings,
    session: SessionSettings,
    channel: C,
    sink: S,
    decoder: FrameDecoder,
    link: Option<SerialLink>,
    state: SessionState,
    backoff: Backoff,
    retry_delay: Duration,
    /// Wait the poll interval before the next command
    poll_pending: bool,
    nacks: u32,
    stop: StopSignal,
}

impl<C: SerialChannel, S: TelemetrySink> SessionController<C, S> {
    /// Controller for validated settings
    pub fn new(settings: &Settings, channel: C, sink: S, stop: StopSignal) -> Self {
        Self::with_settings(settings.serial.clone(), settings.session.clone(), channel, sink, stop)
    }

    /// Controller built from its parts, bypassing config validation
    pub fn with_settings(
        serial: SerialSettings,
        session: SessionSettings,
        channel: C,
        sink: S,
        stop: StopSignal,
    ) -> Self {
        Self {
            decoder: FrameDecoder::for_version(session.wire_version),
            backoff: Backoff::new(session.backoff_initial, session.backoff_max),
            serial,
            session,
            channel,
            sink,
            link: None,
            state: SessionState::Disconnected,
            retry_delay: Duration::ZERO,
            poll_pending: false,
            nacks: 0,
            stop,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Where readings are delivered
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Channel the link is opened through
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Signal that stops this session
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Whether the device is currently held open
    pub fn is_link_open(&self) -> bool {
        self.link.is_some()
    }

    /// Delay the current fault waits before reconnecting
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Perform one state transition and return the new state.
    ///
    /// Once stopped, every step leaves the session Disconnected with the link
    /// closed.
    pub fn step(&mut self) -> SessionState {
        if self.stop.is_stopped() {
            self.shutdown();
            return self.state;
        }

        let from = self.state;
        let result = match from {
            SessionState::Disconnected => Ok(SessionState::Connecting),
            SessionState::Connecting => self.connect(),
            SessionState::Connected => self.poll(),
            SessionState::AwaitingFrame => self.await_frame(),
            SessionState::Faulted => self.wait_backoff(),
        };

        match result {
            Ok(to) => {
                self.state = to;
                if to != from {
                    info!(from = %from, to = %to, "session state");
                }
            }
            Err(ConnectionError::Stopped) => self.shutdown(),
            Err(err) => self.fault(err),
        }
        self.state
    }

    /// Step until stopped. Returns with the session Disconnected.
    pub fn run(&mut self) {
        let span = info_span!("session", id = %Uuid::new_v4(), device = %self.serial.device);
        let _enter = span.enter();
        info!(baud = self.serial.baud, "session started");

        while !self.stop.is_stopped() {
            self.step();
        }
        self.shutdown();
        info!("session stopped");
    }

    /// Run on a dedicated thread
    pub fn spawn(mut self) -> std::io::Result<SessionHandle>
    where
        C: 'static,
        S: 'static,
    {
        let stop = self.stop.clone();
        let thread = thread::Builder::new()
            .name("tinyweather-session".to_string())
            .spawn(move || self.run())?;
        Ok(SessionHandle { stop, thread })
    }

    fn connect(&mut self) -> Result<SessionState, ConnectionError> {
        let link = self
            .channel
            .open(&self.serial.device, self.serial.baud, self.serial.timeout)?;
        self.decoder.reset();
        self.link = Some(link);

        if self.session.heartbeat {
            self.handshake()?;
        }
        self.poll_pending = false;
        self.nacks = 0;
        Ok(SessionState::Connected)
    }

    /// Exchange heartbeats until the station answers
    fn handshake(&mut self) -> Result<(), ConnectionError> {
        let heartbeat = self
            .decoder
            .encode_control(ControlCode::Heartbeat)
            .map_err(invalid_input)?;
        let wait = if self.serial.timeout.is_zero() {
            HEARTBEAT_TIMEOUT
        } else {
            self.serial.timeout
        };

        for attempt in 1..=self.session.retries {
            debug!(attempt, "sending heartbeat");
            self.link_mut()?.write(&heartbeat)?;
            match self.read_until(Instant::now().checked_add(wait), |f| {
                f.control() == Some(ControlCode::Heartbeat)
            }) {
                Ok(()) => {
                    debug!(attempt, "heartbeat confirmed");
                    return Ok(());
                }
                Err(ConnectionError::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ConnectionError::NoHeartbeat {
            attempts: self.session.retries,
        })
    }

    /// Read frames until one satisfies `done`, ignoring everything else
    fn read_until(
        &mut self,
        deadline: Option<Instant>,
        done: impl Fn(&Frame) -> bool,
    ) -> Result<(), ConnectionError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut fresh = 0;
        loop {
            let mut bytes = &chunk[..fresh];
            loop {
                let item = self.decoder.feed(bytes).next();
                let Some(item) = item else { break };
                bytes = &[];
                match item {
                    Ok(frame) if done(&frame) => return Ok(()),
                    Ok(frame) => debug!(tag = ?frame.tag(), "ignored during handshake"),
                    Err(e) => debug!("decode error during handshake: {}", e),
                }
            }
            let link = self.link.as_mut().ok_or(ConnectionError::Closed)?;
            fresh = link.read(&mut chunk, deadline, &self.stop)?;
        }
    }

    fn poll(&mut self) -> Result<SessionState, ConnectionError> {
        if self.poll_pending {
            if self.stop.wait_timeout(self.session.poll_interval) {
                return Err(ConnectionError::Stopped);
            }
            self.poll_pending = false;
        }
        self.send_command()?;
        Ok(SessionState::AwaitingFrame)
    }

    fn send_command(&mut self) -> Result<(), ConnectionError> {
        let command = self.session.command;
        let bytes = self.decoder.encode_command(command).map_err(invalid_input)?;
        self.link_mut()?.write(&bytes)?;
        debug!(?command, "poll sent");
        Ok(())
    }

    fn send_control(&mut self, code: ControlCode) -> Result<(), ConnectionError> {
        let bytes = self.decoder.encode_control(code).map_err(invalid_input)?;
        self.link_mut()?.write(&bytes)
    }

    fn await_frame(&mut self) -> Result<SessionState, ConnectionError> {
        let mut deadline = self.link_mut()?.deadline();
        let mut chunk = [0u8; READ_CHUNK];
        let mut fresh = 0;
        loop {
            let mut bytes = &chunk[..fresh];
            loop {
                let item = self.decoder.feed(bytes).next();
                let Some(item) = item else { break };
                bytes = &[];
                match self.handle(item)? {
                    Handled::Pending => {}
                    Handled::Resent => deadline = self.link_mut()?.deadline(),
                    Handled::Dispatched => return Ok(SessionState::Connected),
                }
            }

            // Leftovers of a reply are settled once the line goes quiet
            let quiet_at = if self.decoder.has_pending_error() || self.decoder.buffered() > 0 {
                Instant::now().checked_add(INTER_FRAME_GAP)
            } else {
                None
            };
            let wait = match (deadline, quiet_at) {
                (Some(d), Some(q)) => Some(d.min(q)),
                (d, q) => d.or(q),
            };

            let link = self.link.as_mut().ok_or(ConnectionError::Closed)?;
            match link.read(&mut chunk, wait, &self.stop) {
                Ok(n) => fresh = n,
                Err(ConnectionError::Timeout)
                    if quiet_at.is_some() && deadline.map_or(true, |d| Instant::now() < d) =>
                {
                    fresh = 0;
                    if let Some(err) = self.decoder.flush() {
                        self.handle(Err(err))?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn handle(&mut self, item: Result<Frame, DecodeError>) -> Result<Handled, ConnectionError> {
        let frame = match item {
            Ok(frame) => frame,
            Err(err) => {
                let nack = ControlCode::nack_for(&err);
                warn!(error = %err, ?nack, "bad frame from station");
                self.send_control(nack)?;
                return Ok(Handled::Pending);
            }
        };

        match frame.tag() {
            FrameTag::Message(id) if id.is_response() => {
                if self.session.command.expected_response() != Some(id) {
                    debug!(?id, "unsolicited response");
                }
                debug!(
                    ?id,
                    temperature = ?frame.temperature(),
                    humidity = ?frame.humidity(),
                    pressure = ?frame.pressure(),
                    "reading"
                );
                self.sink.accept(frame);
                self.send_control(ControlCode::Ack)?;
                self.backoff.reset();
                self.nacks = 0;
                self.poll_pending = true;
                Ok(Handled::Dispatched)
            }
            FrameTag::Message(id) => {
                debug!(?id, "ignoring command frame from station");
                Ok(Handled::Pending)
            }
            FrameTag::Control(code) if code.is_nack() => {
                self.nacks += 1;
                if self.nacks >= self.session.retries {
                    return Err(ConnectionError::Rejected { nacks: self.nacks });
                }
                warn!(?code, nacks = self.nacks, "station rejected poll, resending");
                self.send_command()?;
                Ok(Handled::Resent)
            }
            FrameTag::Control(code) => {
                debug!(?code, "control frame");
                Ok(Handled::Pending)
            }
        }
    }

    fn wait_backoff(&mut self) -> Result<SessionState, ConnectionError> {
        if self.stop.wait_timeout(self.retry_delay) {
            return Err(ConnectionError::Stopped);
        }
        Ok(SessionState::Disconnected)
    }

    fn fault(&mut self, err: ConnectionError) {
        self.close_link();
        self.retry_delay = self.backoff.next_delay();
        warn!(
            error = %err,
            open_error = err.is_open_error(),
            from = %self.state,
            attempt = self.backoff.attempts(),
            delay = ?self.retry_delay,
            "session faulted"
        );
        self.state = SessionState::Faulted;
    }

    fn shutdown(&mut self) {
        self.close_link();
        if self.state != SessionState::Disconnected {
            info!(from = %self.state, "session stopped, disconnecting");
            self.state = SessionState::Disconnected;
        }
    }

    fn close_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.decoder.reset();
        self.nacks = 0;
    }

    fn link_mut(&mut self) -> Result<&mut SerialLink, ConnectionError> {
        self.link.as_mut().ok_or(ConnectionError::Closed)
    }
}

fn invalid_input(err: DecodeError) -> ConnectionError {
    ConnectionError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, err))
}

/// Handle to a session running on its own thread
#[derive(Debug)]
pub struct SessionHandle {
    stop: StopSignal,
    thread: JoinHandle<()>,
}

impl SessionHandle {
    /// Ask the session to stop; returns immediately
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Whether the session thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the session thread to exit
    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }
}
