//! Serial port handling
//!
//! Low-level port access through the `serialport` crate, plus the
//! [`PortIo`] abstraction the link is built on so tests can substitute an
//! in-memory port.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

use super::ConnectionError;

/// Port-level read timeout. Link reads poll in slices of this length so a
/// stop request is noticed promptly even when the link timeout is infinite.
pub const POLL_SLICE: Duration = Duration::from_millis(100);

/// Byte I/O of an open port
pub trait PortIo: Read + Write + Send {
    /// Set timeout for a single read/write call
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard bytes received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;
}

/// Serial port wrapper implementing PortIo
pub struct SerialPortIo {
    port: Box<dyn SerialPort>,
}

impl SerialPortIo {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialPortIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialPortIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl PortIo for SerialPortIo {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "/dev/rfcomm0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key so that USB adapters come first, then Bluetooth virtual
/// serial ports, then everything else:
///  - ttyACM* (sorted numerically by suffix)
///  - ttyUSB* (sorted numerically by suffix)
///  - rfcomm* (sorted numerically)
///  - other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0, "ttyACM"), (1, "ttyUSB"), (2, "rfcomm")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: Bluetooth rfcomm bindings are not always enumerated
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if ["ttyACM", "ttyUSB", "rfcomm"]
                    .iter()
                    .any(|p| fname.starts_with(p))
                {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        product: None,
                    });
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

fn map_open_error(device: &str, e: serialport::Error) -> ConnectionError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => ConnectionError::NotFound(device.to_string()),
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            ConnectionError::NotFound(device.to_string())
        }
        _ => ConnectionError::Open {
            device: device.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Open and configure a serial port for the station.
///
/// On Unix the port is opened in exclusive mode, so another process cannot
/// open it while the controller holds it.
pub fn open_port(device: &str, baud: u32) -> Result<Box<dyn SerialPort>, ConnectionError> {
    #[cfg(unix)]
    if !std::path::Path::new(device).exists() {
        return Err(ConnectionError::NotFound(device.to_string()));
    }

    let mut port = serialport::new(device, baud)
        .timeout(POLL_SLICE)
        .open()
        .map_err(|e| map_open_error(device, e))?;

    configure_port(port.as_mut()).map_err(|e| map_open_error(device, e))?;
    Ok(port)
}

/// Standard 8N1 configuration without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), serialport::Error> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;

    // Keep DTR asserted: toggling it resets Arduino-class stations
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!("configure_port: failed to set DTR high: {} (continuing)", e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyUSB1",
            "/dev/rfcomm0",
            "/dev/ttyUSB0",
            "/dev/ttyACM1",
            "/dev/someport",
            "/dev/ttyACM10",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo {
                name: n.to_string(),
                vid: None,
                pid: None,
                product: None,
            })
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/rfcomm0",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_open_missing_device() {
        match open_port("/dev/tinyweather-does-not-exist", 9600) {
            Err(ConnectionError::NotFound(device)) => {
                assert_eq!(device, "/dev/tinyweather-does-not-exist")
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("opened a nonexistent device"),
        }
    }
}
