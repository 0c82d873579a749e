//! Mode-select CPLD control
//!
//! The CPLD decides whether the board boots normally or comes up in serial
//! download mode. It sits behind one of two bit-banged buses, picked once
//! from the profile's protocol.

pub mod i2c;
pub mod spi;

use crate::config::{CpldProfile, CpldProtocol};
use crate::error::Result;
use crate::gpio::{GpioConfig, GpioPort};

pub use i2c::I2cBitBang;
pub use spi::SpiBitBang;

/// Command names looked up in the CPLD profile
pub mod commands {
    pub const RESET: &str = "reset";
    pub const SERIAL_MODE: &str = "serial_mode";
    pub const NORMAL_MODE: &str = "normal_mode";
}

/// A CPLD driver bound to one profile
pub enum ModeController<'p, P: GpioPort = Box<dyn GpioPort>> {
    I2c {
        bus: I2cBitBang<P>,
        profile: &'p CpldProfile,
    },
    Spi {
        bus: SpiBitBang<P>,
        profile: &'p CpldProfile,
    },
}

/// Port setup a protocol needs, applied when the adapter is opened
pub fn gpio_config(protocol: CpldProtocol) -> GpioConfig {
    match protocol {
        CpldProtocol::I2c { .. } => i2c::gpio_config(),
        CpldProtocol::Spi => spi::gpio_config(),
    }
}

impl<'p, P: GpioPort> ModeController<'p, P> {
    /// Build the driver for `profile` on an already opened port
    pub fn new(port: P, profile: &'p CpldProfile) -> Result<Self> {
        log::debug!("Using CPLD profile {} ({:?})", profile.name, profile.protocol);
        Ok(match profile.protocol {
            CpldProtocol::I2c { dev_addr } => ModeController::I2c {
                bus: I2cBitBang::new(port, dev_addr)?,
                profile,
            },
            CpldProtocol::Spi => ModeController::Spi {
                bus: SpiBitBang::new(port)?,
                profile,
            },
        })
    }

    fn profile(&self) -> &'p CpldProfile {
        match self {
            ModeController::I2c { profile, .. } | ModeController::Spi { profile, .. } => *profile,
        }
    }

    /// Run the named register command from the profile
    pub fn issue_command(&mut self, name: &str) -> Result<()> {
        let cmd = self.profile().command(name)?;
        log::debug!("CPLD command {} (register 0x{:04X})", name, cmd.addr);
        match self {
            ModeController::I2c { bus, .. } => bus.write_command(cmd),
            ModeController::Spi { bus, .. } => bus.write_command(cmd),
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        self.issue_command(commands::RESET)
    }

    /// Select serial download boot mode
    pub fn serial_mode(&mut self) -> Result<()> {
        self.issue_command(commands::SERIAL_MODE)
    }

    /// Select normal boot mode
    pub fn normal_mode(&mut self) -> Result<()> {
        self.issue_command(commands::NORMAL_MODE)
    }

    /// Verify the CPLD revision; does nothing if the profile has no revision entry
    pub fn check_revision(&mut self) -> Result<()> {
        let Some(revision) = self.profile().revision() else {
            return Ok(());
        };
        match self {
            ModeController::I2c { bus, .. } => bus.check_revision(revision),
            ModeController::Spi { bus, .. } => bus.check_revision(revision),
        }
    }

    /// Close the GPIO port
    pub fn release(self) -> Result<()> {
        match self {
            ModeController::I2c { bus, .. } => bus.release(),
            ModeController::Spi { bus, .. } => bus.release(),
        }
    }
}
