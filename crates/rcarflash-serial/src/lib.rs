//! rcarflash-serial - serial monitor transport
//!
//! Implements the core [`Transport`](rcarflash_core::transport::Transport)
//! over a `serialport` handle and the
//! [`SerialPortMap`](rcarflash_core::resolver::SerialPortMap) lookups between
//! tty devices and USB serial numbers.

mod error;
mod ports;
mod transport;

pub use error::{Result, SerialError};
pub use ports::{port_for, serial_of, SystemPorts};
pub use transport::{SerialTransport, DEFAULT_TIMEOUT};
