//! Serial port to USB serial number mapping

use std::path::{Path, PathBuf};

use rcarflash_core::resolver::SerialPortMap;
use rcarflash_core::Result as CoreResult;
use serialport::{SerialPortInfo, SerialPortType};

use crate::error::SerialError;

/// The serial ports the OS currently knows about
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl SystemPorts {
    pub fn new() -> Self {
        Self
    }

    fn ports(&self) -> CoreResult<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports().map_err(SerialError::from)?;
        log::trace!("{} serial port(s) available", ports.len());
        Ok(ports)
    }
}

impl SerialPortMap for SystemPorts {
    fn usb_serial_of(&self, port: &str) -> CoreResult<Option<String>> {
        Ok(serial_of(&self.ports()?, port))
    }

    fn port_for_serial(&self, serial: &str) -> CoreResult<Option<String>> {
        Ok(port_for(&self.ports()?, serial))
    }
}

fn usb_serial(info: &SerialPortInfo) -> Option<&str> {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => usb.serial_number.as_deref(),
        _ => None,
    }
}

// Follows /dev/serial/by-id style symlinks
fn canonical(path: &str) -> PathBuf {
    Path::new(path)
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from(path))
}

/// USB serial number of the adapter providing `port`
pub fn serial_of(ports: &[SerialPortInfo], port: &str) -> Option<String> {
    let wanted = canonical(port);
    ports
        .iter()
        .find(|info| info.port_name == port || canonical(&info.port_name) == wanted)
        .and_then(usb_serial)
        .map(str::to_string)
}

/// First serial port provided by the adapter with USB serial number `serial`
pub fn port_for(ports: &[SerialPortInfo], serial: &str) -> Option<String> {
    let mut matches = ports.iter().filter(|info| usb_serial(info) == Some(serial));
    let first = matches.next()?;
    let others: Vec<&str> = matches.map(|info| info.port_name.as_str()).collect();
    if !others.is_empty() {
        log::debug!(
            "Adapter {} also provides {}, using {}",
            serial,
            others.join(", "),
            first.port_name
        );
    }
    Some(first.port_name.clone())
}
