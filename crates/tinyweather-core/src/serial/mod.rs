//! Serial Communication
//!
//! Opening, reading and writing the station's serial device. A device is
//! held by at most one link at a time; see [`DeviceLocks`].

mod error;
mod link;
mod port;

pub use error::ConnectionError;
pub use link::{DeviceLease, DeviceLocks, SerialChannel, SerialLink, SerialPortChannel};
pub use port::{configure_port, list_ports, open_port, PortInfo, PortIo, SerialPortIo, POLL_SLICE};
