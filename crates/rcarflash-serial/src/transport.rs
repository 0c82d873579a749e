//! Serial port transport to the board's monitor

use std::io::{Read, Write};
use std::time::Duration;

use rcarflash_core::transport::Transport;
use rcarflash_core::Result as CoreResult;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::{Result, SerialError};

/// Read timeout used unless a flash event overrides it
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Serial port transport (8N1, no flow control)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    device: String,
}

impl SerialTransport {
    /// Open `device` at `baud` with the given read timeout
    pub fn open(device: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|source| SerialError::OpenFailed {
                device: device.to_string(),
                source,
            })?;

        log::info!("Using serial port {} with baudrate {}", device, baud);

        Ok(Self {
            port,
            device: device.to_string(),
        })
    }

    /// Close the port, flushing pending output
    pub fn close(mut self) -> Result<()> {
        self.port.flush()?;
        log::debug!("Closed serial port {}", self.device);
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> CoreResult<()> {
        self.port.write_all(data).map_err(SerialError::from)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(SerialError::from(e).into()),
        }
    }

    fn timeout(&self) -> Duration {
        self.port.timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> CoreResult<()> {
        self.port.set_timeout(timeout).map_err(SerialError::from)?;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> CoreResult<()> {
        self.port.flush().map_err(SerialError::from)?;
        self.port.set_baud_rate(baud).map_err(SerialError::from)?;
        log::info!("Serial port {} now at {} baud", self.device, baud);
        Ok(())
    }
}
