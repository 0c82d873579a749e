//! USB-to-GPIO adapter backends compiled into this binary

use rcarflash_core::gpio::GpioAdapter;

/// The CPLD adapter capability, if any backend was enabled at build time
#[cfg(feature = "ftdi")]
pub fn gpio_adapter() -> Option<Box<dyn GpioAdapter>> {
    Some(Box::new(rcarflash_ftdi::FtdiAdapter::new()))
}

#[cfg(not(feature = "ftdi"))]
pub fn gpio_adapter() -> Option<Box<dyn GpioAdapter>> {
    None
}
