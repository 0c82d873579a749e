//! Adapter discovery
//!
//! Works out which USB-to-GPIO adapter drives the CPLD, and which serial
//! port talks to the board's monitor. Both questions are answered through
//! the adapter's USB serial number.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::CpldProfile;
use crate::error::{DeviceResolutionError, Result};
use crate::gpio::{DeviceLocator, GpioAdapter};

/// Serial device used when nothing else selects one
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyUSB0";

/// How long the adapter's serial port may take to come back after a CPLD switch
pub const PORT_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay between two looks at a serial port that is not ready yet
pub const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// OS view of which serial port belongs to which USB device
pub trait SerialPortMap {
    /// USB serial number of the device behind `port`, if it is a USB port
    fn usb_serial_of(&self, port: &str) -> Result<Option<String>>;

    /// Serial port device provided by the USB device with serial number `serial`
    fn port_for_serial(&self, serial: &str) -> Result<Option<String>>;
}

/// The adapter picked for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    /// USB serial number
    pub serial: String,
}

impl ResolvedDevice {
    /// Locator for opening the adapter channel wired to the CPLD
    pub fn locator(&self, profile: &CpldProfile) -> DeviceLocator {
        DeviceLocator {
            vid: profile.usb_vid,
            pid: profile.usb_pid,
            serial: self.serial.clone(),
            interface: profile.usb_interface,
        }
    }
}

/// Pick the CPLD adapter
///
/// An explicit serial number wins. Otherwise exactly one attached adapter
/// with the profile's VID:PID is taken as is; with several, the serial
/// console hint is used to tell them apart.
pub fn resolve(
    explicit: Option<&str>,
    profile: &CpldProfile,
    console_hint: Option<&str>,
    adapter: &dyn GpioAdapter,
    ports: &dyn SerialPortMap,
) -> Result<ResolvedDevice> {
    if let Some(serial) = explicit {
        log::debug!("Using adapter with serial number {}", serial);
        return Ok(ResolvedDevice {
            serial: serial.to_string(),
        });
    }

    let candidates = adapter.list_devices(profile.usb_vid, profile.usb_pid)?;
    log::debug!(
        "{} {:04x}:{:04x} adapter(s) found via {}",
        candidates.len(),
        profile.usb_vid,
        profile.usb_pid,
        adapter.name()
    );

    match candidates.as_slice() {
        [] => Err(DeviceResolutionError::NotFound {
            vid: profile.usb_vid,
            pid: profile.usb_pid,
        }
        .into()),
        [only] => {
            log::info!("Using CPLD adapter {}", only);
            Ok(ResolvedDevice {
                serial: only.serial.clone(),
            })
        }
        _ => {
            if let Some(port) = console_hint {
                if let Some(serial) = ports.usb_serial_of(port)? {
                    if let Some(hit) = candidates.iter().find(|c| c.serial == serial) {
                        log::info!("Using CPLD adapter {} (serial console {})", hit, port);
                        return Ok(ResolvedDevice {
                            serial: hit.serial.clone(),
                        });
                    }
                }
                log::debug!("Serial console {} does not belong to any candidate", port);
            }
            Err(DeviceResolutionError::Ambiguous { candidates }.into())
        }
    }
}

/// Pick the serial device for the monitor
///
/// An explicit device wins. Otherwise, if the CPLD adapter's serial number
/// is known, its serial port is used; failing that the default device.
///
/// The adapter's port is re-created by the OS once the GPIO channel was
/// released, so it is polled for up to `settle`. Within that window a port
/// is only taken once two lookups in a row agree on it.
pub fn serial_device(
    explicit: Option<&str>,
    adapter_serial: Option<&str>,
    ports: &dyn SerialPortMap,
    settle: Duration,
) -> Result<String> {
    if let Some(dev) = explicit {
        return Ok(dev.to_string());
    }
    let Some(serial) = adapter_serial else {
        return Ok(DEFAULT_SERIAL_DEVICE.to_string());
    };

    let deadline = Instant::now() + settle;
    let mut last: Option<String> = None;
    loop {
        let found = ports.port_for_serial(serial)?;
        let expired = Instant::now() >= deadline;
        match &found {
            Some(port) if expired || last.as_ref() == Some(port) => {
                log::debug!("Serial port of adapter {} is {}", serial, port);
                return Ok(port.clone());
            }
            None if expired => {
                return Err(DeviceResolutionError::NoSerialPort(serial.to_string()).into())
            }
            _ => {}
        }
        log::debug!("Waiting for the serial port of adapter {} to settle", serial);
        last = found;
        thread::sleep(PORT_POLL_INTERVAL);
    }
}
