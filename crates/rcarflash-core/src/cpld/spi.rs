//! Bit-banged synchronous register protocol
//!
//! Write-only 4-wire protocol: 32-bit value then 8-bit register address,
//! both MSB first, followed by a strobe that latches the value. Every
//! transfer is built as one waveform and clocked out with a single
//! [`GpioPort::exchange`], so bit timing comes from the adapter.

use crate::config::RegisterCommand;
use crate::error::{ConfigError, Result};
use crate::gpio::{GpioConfig, GpioPort, Pins};

pub const SCK: Pins = Pins::AD0;
pub const MOSI: Pins = Pins::AD1;
/// Chip select / strobe, high when idle
pub const CS: Pins = Pins::AD3;

/// Clock cycles sent before the framing byte
const SYNC_CYCLES: usize = 32;
const SYNC_BYTE: u8 = 0xFE;

/// Latches the shifted value into the addressed register
const STROBE: [Pins; 5] = [
    MOSI.union(CS),
    MOSI,
    MOSI.union(SCK),
    MOSI.union(SCK).union(CS),
    CS,
];

/// Port setup: SCK, MOSI and CS driven, CS high
pub fn gpio_config() -> GpioConfig {
    GpioConfig {
        direction: SCK | MOSI | CS,
        initial: CS,
        frequency: None,
    }
}

/// Two samples per bit, MSB first: clock high with data, then clock low with data
pub fn prepare_write_byte(byte: u8) -> [Pins; 16] {
    let mut samples = [Pins::empty(); 16];
    for bit in 0..8 {
        let data = if byte & (0x80 >> bit) != 0 {
            MOSI
        } else {
            Pins::empty()
        };
        samples[bit * 2] = SCK | data | CS;
        samples[bit * 2 + 1] = data | CS;
    }
    samples
}

pub struct SpiBitBang<P: GpioPort> {
    port: P,
    released: bool,
}

impl<P: GpioPort> SpiBitBang<P> {
    /// Take ownership of `port` and synchronize the target
    pub fn new(port: P) -> Result<Self> {
        let mut spi = Self {
            port,
            released: false,
        };
        spi.synchronize()?;
        Ok(spi)
    }

    /// Align the target's bit counter
    pub fn synchronize(&mut self) -> Result<()> {
        let mut waveform = Vec::with_capacity(SYNC_CYCLES * 2 + 16);
        for _ in 0..SYNC_CYCLES {
            waveform.push(SCK | CS);
            waveform.push(CS);
        }
        waveform.extend_from_slice(&prepare_write_byte(SYNC_BYTE));
        self.port.exchange(&waveform)?;
        log::debug!("Register interface synchronized");
        Ok(())
    }

    /// Write a 32-bit value into register `addr`
    pub fn write_register(&mut self, addr: u8, value: u32) -> Result<()> {
        log::trace!("Register write 0x{:02X} = 0x{:08X}", addr, value);
        let mut waveform = Vec::with_capacity(5 * 16 + STROBE.len());
        for byte in value.to_be_bytes() {
            waveform.extend_from_slice(&prepare_write_byte(byte));
        }
        waveform.extend_from_slice(&prepare_write_byte(addr));
        waveform.extend_from_slice(&STROBE);
        self.port.exchange(&waveform)?;
        Ok(())
    }

    /// Issue a register command; data is right-aligned into the 32-bit value
    pub fn write_command(&mut self, cmd: &RegisterCommand) -> Result<()> {
        let (addr, value) = register_value(cmd)?;
        self.write_register(addr, value)
    }

    /// This protocol has no read-back
    pub fn check_revision(&mut self, _revision: &RegisterCommand) -> Result<()> {
        log::debug!("Revision check not supported by this protocol, skipping");
        Ok(())
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.port.close()
    }
}

impl<P: GpioPort> Drop for SpiBitBang<P> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.port.close() {
                log::warn!("Failed to close GPIO port: {}", e);
            }
        }
    }
}

fn register_value(cmd: &RegisterCommand) -> core::result::Result<(u8, u32), ConfigError> {
    let addr = u8::try_from(cmd.addr).map_err(|_| {
        ConfigError::InvalidValue(format!("register address 0x{:04X} does not fit in 8 bits", cmd.addr))
    })?;
    if cmd.data.len() > 4 {
        return Err(ConfigError::InvalidValue(format!(
            "{} data bytes for register 0x{:02X}, at most 4 fit",
            cmd.data.len(),
            addr
        )));
    }
    let value = cmd
        .data
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    Ok((addr, value))
}
