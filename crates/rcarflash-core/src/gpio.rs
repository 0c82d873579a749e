//! GPIO adapter boundary
//!
//! The CPLD drivers only see a [`GpioPort`]: an 8-bit port whose pins can
//! be switched between input and output, written, read, and clocked through
//! a whole waveform in one synchronized batch. Concrete USB adapters live in
//! their own crates and are handed to the core as a [`GpioAdapter`]
//! capability.

use bitflags::bitflags;

use crate::error::{Candidate, Result};

bitflags! {
    /// Pins of the adapter's 8-bit GPIO port
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Pins: u8 {
        const AD0 = 1 << 0;
        const AD1 = 1 << 1;
        const AD2 = 1 << 2;
        const AD3 = 1 << 3;
        const AD4 = 1 << 4;
        const AD5 = 1 << 5;
        const AD6 = 1 << 6;
        const AD7 = 1 << 7;
    }
}

/// An open GPIO port
///
/// Direction bits set in a mask mean "output". Reads always return the
/// level on every pin, whatever its direction.
pub trait GpioPort {
    /// Switch `pins` to output (bits set in `outputs`) or input (bits clear)
    fn set_direction(&mut self, pins: Pins, outputs: Pins) -> Result<()>;

    /// Drive the output pins to `state`
    fn write(&mut self, state: Pins) -> Result<()>;

    /// Sample all pins
    fn read(&mut self) -> Result<Pins>;

    /// Clock out `waveform` one sample per tick, returning one pin sample per tick
    fn exchange(&mut self, waveform: &[Pins]) -> Result<Vec<Pins>>;

    /// Release the adapter
    ///
    /// Must be idempotent. Pins return to inputs.
    fn close(&mut self) -> Result<()>;
}

impl<T: GpioPort + ?Sized> GpioPort for Box<T> {
    fn set_direction(&mut self, pins: Pins, outputs: Pins) -> Result<()> {
        (**self).set_direction(pins, outputs)
    }

    fn write(&mut self, state: Pins) -> Result<()> {
        (**self).write(state)
    }

    fn read(&mut self) -> Result<Pins> {
        (**self).read()
    }

    fn exchange(&mut self, waveform: &[Pins]) -> Result<Vec<Pins>> {
        (**self).exchange(waveform)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Initial port setup applied when the adapter is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioConfig {
    /// Pins that start as outputs
    pub direction: Pins,
    /// Initial output levels
    pub initial: Pins,
    /// Sample clock for [`GpioPort::exchange`], adapter default if `None`
    pub frequency: Option<u32>,
}

/// Identifies one physical adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLocator {
    pub vid: u16,
    pub pid: u16,
    /// USB serial number
    pub serial: String,
    /// Adapter channel / interface index
    pub interface: u8,
}

/// USB-to-GPIO adapter backend
///
/// Passed explicitly to whatever needs to find or open an adapter. A build
/// without any backend simply has no value of this type.
pub trait GpioAdapter {
    /// Backend name for log messages
    fn name(&self) -> &'static str;

    /// Attached adapters with the given VID:PID
    fn list_devices(&self, vid: u16, pid: u16) -> Result<Vec<Candidate>>;

    /// Open one adapter and apply `config`
    fn open(&self, locator: &DeviceLocator, config: &GpioConfig) -> Result<Box<dyn GpioPort>>;
}
