//! FTDI synchronous bit-bang GPIO port
//!
//! In synchronous bit-bang mode every byte written to the bulk OUT endpoint
//! is put on the eight ADBUS pins at the sample clock, and the pin levels
//! seen at that moment come back as one byte on the bulk IN endpoint. That
//! makes a batch write a synchronized waveform with read-back, and a single
//! byte a plain pin write or read.

use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Endpoint, Interface, MaybeFuture};
use rcarflash_core::error::{Candidate, Result as CoreResult};
use rcarflash_core::gpio::{DeviceLocator, GpioAdapter, GpioConfig, GpioPort, Pins};

use crate::error::{FtdiError, Result};
use crate::protocol::*;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);
const BULK_TIMEOUT: Duration = Duration::from_secs(2);

/// One channel of an FTDI chip in synchronous bit-bang mode
pub struct FtdiGpio {
    interface: Interface,
    /// Channel index (0 = A)
    channel: u8,
    /// Pins currently configured as outputs
    direction: Pins,
    /// Last output latch value
    state: Pins,
    closed: bool,
}

impl FtdiGpio {
    /// Open the adapter described by `locator` and apply `config`
    pub fn open(locator: &DeviceLocator, config: &GpioConfig) -> Result<Self> {
        let channel = channel_name(locator.interface).ok_or_else(|| {
            FtdiError::OpenFailed(format!("no channel with index {}", locator.interface))
        })?;

        let device_info = nusb::list_devices()
            .wait()
            .map_err(|e| FtdiError::OpenFailed(e.to_string()))?
            .find(|d| {
                d.vendor_id() == locator.vid
                    && d.product_id() == locator.pid
                    && d.serial_number() == Some(locator.serial.as_str())
            })
            .ok_or_else(|| FtdiError::DeviceNotFound(locator.serial.clone()))?;

        log::info!(
            "Opening FTDI {:04x}:{:04x} serial {} channel {}",
            locator.vid,
            locator.pid,
            locator.serial,
            channel
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| FtdiError::OpenFailed(e.to_string()))?;

        // The kernel's ftdi_sio driver binds every channel as a tty
        #[cfg(target_os = "linux")]
        let interface = device.detach_and_claim_interface(locator.interface).wait();
        #[cfg(not(target_os = "linux"))]
        let interface = device.claim_interface(locator.interface).wait();
        let interface = interface.map_err(|e| FtdiError::ClaimFailed(e.to_string()))?;

        let mut gpio = Self {
            interface,
            channel: locator.interface,
            direction: config.direction,
            state: config.initial,
            closed: false,
        };
        gpio.init(config)?;
        Ok(gpio)
    }

    fn init(&mut self, config: &GpioConfig) -> Result<()> {
        self.sio_request(SIO_RESET_REQUEST, SIO_RESET_SIO)?;
        self.sio_request(SIO_RESET_REQUEST, SIO_RESET_PURGE_RX)?;
        self.sio_request(SIO_RESET_REQUEST, SIO_RESET_PURGE_TX)?;
        self.sio_request(SIO_SET_LATENCY_TIMER_REQUEST, LATENCY_MS)?;

        let frequency = config.frequency.unwrap_or(DEFAULT_FREQUENCY);
        let divisor = bitbang_divisor(frequency);
        log::debug!(
            "Bit-bang sample clock {} Hz (divisor {})",
            frequency,
            divisor
        );
        self.sio_request(SIO_SET_BAUDRATE_REQUEST, divisor)?;

        self.set_bitmode(BITMODE_SYNCBB, self.direction)?;
        self.transfer(&[self.state.bits()])?;
        log::debug!(
            "Sync bit-bang enabled, outputs {:?}, state {:?}",
            self.direction,
            self.state
        );
        Ok(())
    }

    fn sio_request(&self, request: u8, value: u16) -> Result<()> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: sio_index(self.channel),
                    data: &[],
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| {
                FtdiError::TransferFailed(format!("Control request 0x{:02X} failed: {}", request, e))
            })
    }

    fn set_bitmode(&self, mode: u8, outputs: Pins) -> Result<()> {
        let value = (u16::from(mode) << 8) | u16::from(outputs.bits());
        self.sio_request(SIO_SET_BITMODE_REQUEST, value)
    }

    /// Clock out `data` and collect one sample per byte
    fn transfer(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.closed {
            return Err(FtdiError::Closed);
        }
        let mut samples = Vec::with_capacity(data.len());
        for chunk in data.chunks(MAX_WRITE_CHUNK) {
            self.bulk_write(chunk)?;
            samples.extend(self.bulk_read(chunk.len())?);
        }
        log::trace!("Bit-bang transfer of {} samples", data.len());
        Ok(samples)
    }

    fn bulk_write(&mut self, data: &[u8]) -> Result<()> {
        let mut out_ep: Endpoint<Bulk, Out> = self
            .interface
            .endpoint(out_endpoint(self.channel))
            .map_err(|e| FtdiError::TransferFailed(e.to_string()))?;

        let mut out_buf = Buffer::new(data.len());
        out_buf.extend_from_slice(data);
        out_ep
            .transfer_blocking(out_buf, BULK_TIMEOUT)
            .into_result()
            .map_err(|e| FtdiError::TransferFailed(format!("Bulk write failed: {}", e)))?;
        Ok(())
    }

    fn bulk_read(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut in_ep: Endpoint<Bulk, In> = self
            .interface
            .endpoint(in_endpoint(self.channel))
            .map_err(|e| FtdiError::TransferFailed(e.to_string()))?;

        let max_packet_size = in_ep.max_packet_size();
        let mut result = Vec::with_capacity(len);
        let mut empty_reads = 0;

        while result.len() < len {
            let remaining = len - result.len();
            let packets = remaining.div_ceil(max_packet_size - MODEM_STATUS_SIZE);
            let request_len = packets * max_packet_size;

            let mut in_buf = Buffer::new(request_len);
            in_buf.set_requested_len(request_len);
            let data = in_ep
                .transfer_blocking(in_buf, BULK_TIMEOUT)
                .into_result()
                .map_err(|e| FtdiError::TransferFailed(format!("Bulk read failed: {}", e)))?;

            let before = result.len();
            result.extend(strip_modem_status(&data, max_packet_size));
            if result.len() == before {
                empty_reads += 1;
                if empty_reads >= MAX_EMPTY_READS {
                    return Err(FtdiError::ShortRead {
                        expected: len,
                        got: result.len(),
                    });
                }
            }
        }
        result.truncate(len);
        Ok(result)
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.set_bitmode(BITMODE_RESET, Pins::empty())?;
        log::debug!("FTDI channel {} released", self.channel);
        Ok(())
    }
}

/// Payload bytes of a bulk IN transfer, without the per-packet status header
pub fn strip_modem_status(data: &[u8], max_packet_size: usize) -> Vec<u8> {
    data.chunks(max_packet_size)
        .filter(|packet| packet.len() > MODEM_STATUS_SIZE)
        .flat_map(|packet| packet[MODEM_STATUS_SIZE..].iter().copied())
        .collect()
}

impl GpioPort for FtdiGpio {
    fn set_direction(&mut self, pins: Pins, outputs: Pins) -> CoreResult<()> {
        if self.closed {
            return Err(FtdiError::Closed.into());
        }
        let direction = (self.direction - pins) | (outputs & pins);
        if direction != self.direction {
            self.set_bitmode(BITMODE_SYNCBB, direction)?;
            self.direction = direction;
        }
        Ok(())
    }

    fn write(&mut self, state: Pins) -> CoreResult<()> {
        self.transfer(&[state.bits()])?;
        self.state = state;
        Ok(())
    }

    fn read(&mut self) -> CoreResult<Pins> {
        let sample = self.transfer(&[self.state.bits()])?;
        let byte = sample.first().copied().unwrap_or_default();
        Ok(Pins::from_bits_retain(byte))
    }

    fn exchange(&mut self, waveform: &[Pins]) -> CoreResult<Vec<Pins>> {
        let data: Vec<u8> = waveform.iter().map(|p| p.bits()).collect();
        let samples = self.transfer(&data)?;
        if let Some(last) = waveform.last() {
            self.state = *last;
        }
        Ok(samples.into_iter().map(Pins::from_bits_retain).collect())
    }

    fn close(&mut self) -> CoreResult<()> {
        Ok(self.shutdown()?)
    }
}

impl Drop for FtdiGpio {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Failed to reset FTDI bit mode: {}", e);
        }
    }
}

/// FTDI backend for the CPLD adapter capability
#[derive(Debug, Default, Clone, Copy)]
pub struct FtdiAdapter;

impl FtdiAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl GpioAdapter for FtdiAdapter {
    fn name(&self) -> &'static str {
        "ftdi"
    }

    fn list_devices(&self, vid: u16, pid: u16) -> CoreResult<Vec<Candidate>> {
        let devices = nusb::list_devices().wait().map_err(FtdiError::from)?;
        Ok(devices
            .filter(|d| d.vendor_id() == vid && d.product_id() == pid)
            .map(|d| Candidate {
                serial: d.serial_number().unwrap_or_default().to_string(),
                description: d.product_string().unwrap_or("FTDI device").to_string(),
            })
            .collect())
    }

    fn open(&self, locator: &DeviceLocator, config: &GpioConfig) -> CoreResult<Box<dyn GpioPort>> {
        Ok(Box::new(FtdiGpio::open(locator, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_modem_status() {
        // Two full 8-byte packets and a short one
        let data = [
            0x31, 0x60, 1, 2, 3, 4, 5, 6, //
            0x31, 0x60, 7, 8, 9, 10, 11, 12, //
            0x31, 0x60, 13,
        ];
        assert_eq!(
            strip_modem_status(&data, 8),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13]
        );
    }

    #[test]
    fn test_status_only_packets() {
        assert!(strip_modem_status(&[0x31, 0x60], 64).is_empty());
        assert!(strip_modem_status(&[], 64).is_empty());
    }

    #[test]
    fn test_channel_out_of_range() {
        let locator = DeviceLocator {
            vid: FTDI_VID,
            pid: FTDI_FT4232H_PID,
            serial: "FT5ABCDE".into(),
            interface: MAX_CHANNELS,
        };
        let config = GpioConfig {
            direction: Pins::AD0,
            initial: Pins::empty(),
            frequency: None,
        };
        assert!(matches!(
            FtdiGpio::open(&locator, &config),
            Err(FtdiError::OpenFailed(_))
        ));
    }
}
