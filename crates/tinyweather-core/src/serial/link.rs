//! Serial link
//!
//! A [`SerialLink`] is an open, exclusively held connection to one device.
//! Links are obtained through a [`SerialChannel`], which decides how a port
//! is opened; the real one is [`SerialPortChannel`].

use std::collections::HashSet;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::port::{open_port, PortIo, SerialPortIo, POLL_SLICE};
use super::ConnectionError;
use crate::stop::StopSignal;

/// Registry of devices currently held open in this process
#[derive(Debug, Clone, Default)]
pub struct DeviceLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl DeviceLocks {
    /// Empty registry, independent of [`DeviceLocks::global`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by every [`SerialPortChannel`]
    pub fn global() -> &'static DeviceLocks {
        static GLOBAL: OnceLock<DeviceLocks> = OnceLock::new();
        GLOBAL.get_or_init(DeviceLocks::new)
    }

    /// Take exclusive ownership of `device`, or fail with `Busy`
    pub fn acquire(&self, device: &str) -> Result<DeviceLease, ConnectionError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(device.to_string()) {
            return Err(ConnectionError::Busy(device.to_string()));
        }
        Ok(DeviceLease {
            device: device.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    /// Whether a live lease exists for `device`
    pub fn is_held(&self, device: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(device)
    }
}

/// Ownership of one device; released on drop
#[derive(Debug)]
pub struct DeviceLease {
    device: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.device);
    }
}

/// Opens links to serial devices
pub trait SerialChannel: Send {
    /// Open the underlying port. Exclusivity is handled by [`SerialChannel::open`].
    fn open_port(&mut self, device: &str, baud: u32) -> Result<Box<dyn PortIo>, ConnectionError>;

    /// Registry used to enforce one link per device
    fn locks(&self) -> &DeviceLocks;

    /// Open an exclusive link to `device`.
    ///
    /// A `timeout` of zero makes reads block until data arrives or the
    /// session is stopped.
    fn open(
        &mut self,
        device: &str,
        baud: u32,
        timeout: Duration,
    ) -> Result<SerialLink, ConnectionError> {
        let lease = self.locks().acquire(device)?;
        let mut io = self.open_port(device, baud)?;
        io.set_timeout(POLL_SLICE)?;
        // Drop anything the station sent before we were listening
        if let Err(e) = io.clear_input_buffer() {
            debug!("failed to clear input buffer on {}: {} (continuing)", device, e);
        }

        debug!(device, baud, ?timeout, "serial link open");
        Ok(SerialLink {
            io: Some(io),
            _lease: lease,
            device: device.to_string(),
            baud,
            timeout,
            bytes_read: 0,
            bytes_written: 0,
        })
    }
}

/// [`SerialChannel`] over real serial ports
#[derive(Debug, Clone)]
pub struct SerialPortChannel {
    locks: DeviceLocks,
}

impl SerialPortChannel {
    /// Channel sharing the process-wide device registry
    pub fn new() -> Self {
        Self {
            locks: DeviceLocks::global().clone(),
        }
    }
}

impl Default for SerialPortChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialChannel for SerialPortChannel {
    fn open_port(&mut self, device: &str, baud: u32) -> Result<Box<dyn PortIo>, ConnectionError> {
        let port = open_port(device, baud)?;
        Ok(Box::new(SerialPortIo::new(port)))
    }

    fn locks(&self) -> &DeviceLocks {
        &self.locks
    }
}

/// An open connection to one device
pub struct SerialLink {
    io: Option<Box<dyn PortIo>>,
    _lease: DeviceLease,
    device: String,
    baud: u32,
    timeout: Duration,
    bytes_read: u64,
    bytes_written: u64,
}

impl SerialLink {
    /// Device path this link holds
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Baud rate the port was opened at
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Configured read timeout; zero means none
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// False once the port has been released
    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    /// Deadline for a read starting now, from the configured timeout.
    /// `None` when the timeout is zero or too far out to represent.
    pub fn deadline(&self) -> Option<Instant> {
        if self.timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(self.timeout)
        }
    }

    /// Read whatever is available into `buf`, waiting until `deadline`
    /// (forever if `None`) for at least one byte.
    pub fn read(
        &mut self,
        buf: &mut [u8],
        deadline: Option<Instant>,
        stop: &StopSignal,
    ) -> Result<usize, ConnectionError> {
        let io = self.io.as_mut().ok_or(ConnectionError::Closed)?;
        loop {
            if stop.is_stopped() {
                return Err(ConnectionError::Stopped);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ConnectionError::Timeout);
            }

            match io.read(buf) {
                Ok(0) => return Err(ConnectionError::Closed),
                Ok(n) => {
                    trace!(n, "read");
                    self.bytes_read += n as u64;
                    return Ok(n);
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    stop.wait_timeout(Duration::from_millis(1));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write all of `bytes` and flush
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let io = self.io.as_mut().ok_or(ConnectionError::Closed)?;
        io.write_all(bytes)?;
        io.flush()?;
        self.bytes_written += bytes.len() as u64;
        trace!(n = bytes.len(), "wrote");
        Ok(())
    }

    /// Close the port and release the device
    pub fn close(mut self) {
        self.io = None;
        debug!(
            device = %self.device,
            baud = self.baud(),
            bytes_read = self.bytes_read,
            bytes_written = self.bytes_written,
            "serial link closed"
        );
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("device", &self.device)
            .field("baud", &self.baud)
            .field("timeout", &self.timeout)
            .field("open", &self.io.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Port that replays scripted read results
    struct ScriptedPort {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl PortIo for ScriptedPort {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input_buffer(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct ScriptedChannel {
        locks: DeviceLocks,
        reads: Vec<io::Result<Vec<u8>>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl ScriptedChannel {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                locks: DeviceLocks::new(),
                reads,
                written: Arc::default(),
            }
        }
    }

    impl SerialChannel for ScriptedChannel {
        fn open_port(&mut self, _device: &str, _baud: u32) -> Result<Box<dyn PortIo>, ConnectionError> {
            Ok(Box::new(ScriptedPort {
                reads: std::mem::take(&mut self.reads).into(),
                written: Arc::clone(&self.written),
            }))
        }

        fn locks(&self) -> &DeviceLocks {
            &self.locks
        }
    }

    #[test]
    fn test_read_skips_poll_timeouts() {
        let mut channel = ScriptedChannel::new(vec![
            Err(io::ErrorKind::TimedOut.into()),
            Ok(vec![1, 2, 3]),
        ]);
        let mut link = channel.open("/dev/fake0", 9600, Duration::ZERO).unwrap();
        let mut buf = [0u8; 16];
        let n = link.read(&mut buf, None, &StopSignal::new()).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }

    #[test]
    fn test_read_deadline() {
        let mut channel = ScriptedChannel::new(Vec::new());
        let mut link = channel
            .open("/dev/fake0", 9600, Duration::from_millis(30))
            .unwrap();
        let mut buf = [0u8; 16];
        let deadline = link.deadline();
        assert!(deadline.is_some());
        assert!(matches!(
            link.read(&mut buf, deadline, &StopSignal::new()),
            Err(ConnectionError::Timeout)
        ));
    }

    #[test]
    fn test_huge_timeout_has_no_deadline() {
        let mut channel = ScriptedChannel::new(vec![Ok(vec![0x7f])]);
        let mut link = channel
            .open("/dev/fake0", 9600, Duration::from_secs(u64::MAX))
            .unwrap();
        assert_eq!(link.device(), "/dev/fake0");
        assert_eq!(link.baud(), 9600);
        assert_eq!(link.timeout(), Duration::from_secs(u64::MAX));
        assert_eq!(link.deadline(), None);

        let mut buf = [0u8; 16];
        let deadline = link.deadline();
        assert_eq!(link.read(&mut buf, deadline, &StopSignal::new()).unwrap(), 1);
        assert!(link.is_open());
    }

    #[test]
    fn test_end_of_stream_is_closed() {
        let mut channel = ScriptedChannel::new(vec![Ok(Vec::new())]);
        let mut link = channel.open("/dev/fake0", 9600, Duration::ZERO).unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(
            link.read(&mut buf, None, &StopSignal::new()),
            Err(ConnectionError::Closed)
        ));
    }

    #[test]
    fn test_read_observes_stop() {
        let mut channel = ScriptedChannel::new(Vec::new());
        let mut link = channel.open("/dev/fake0", 9600, Duration::ZERO).unwrap();
        let stop = StopSignal::new();
        stop.stop();
        let mut buf = [0u8; 16];
        assert!(matches!(
            link.read(&mut buf, None, &stop),
            Err(ConnectionError::Stopped)
        ));
    }

    #[test]
    fn test_write_reaches_port() {
        let mut channel = ScriptedChannel::new(Vec::new());
        let written = Arc::clone(&channel.written);
        let mut link = channel.open("/dev/fake0", 9600, Duration::ZERO).unwrap();
        link.write(&[0x7f, 0x43]).unwrap();
        assert_eq!(*written.lock().unwrap(), vec![0x7f, 0x43]);
    }

    #[test]
    fn test_exclusive_until_closed() {
        let mut channel = ScriptedChannel::new(Vec::new());
        let link = channel.open("/dev/fake0", 9600, Duration::ZERO).unwrap();
        assert!(matches!(
            channel.open("/dev/fake0", 9600, Duration::ZERO),
            Err(ConnectionError::Busy(_))
        ));
        // Other devices are unaffected
        let other = channel.open("/dev/fake1", 9600, Duration::ZERO).unwrap();

        link.close();
        assert!(!channel.locks().is_held("/dev/fake0"));
        assert!(channel.open("/dev/fake0", 9600, Duration::ZERO).is_ok());
        drop(other);
        assert!(!channel.locks().is_held("/dev/fake1"));
    }
}
