//! rcarflash-ftdi - FTDI USB-to-GPIO adapter
//!
//! Drives one channel of an FTDI USB UART (FT232R, FT2232H, FT4232H) in
//! synchronous bit-bang mode so the CPLD drivers in `rcarflash-core` can
//! toggle its ADBUS pins. Only raw USB via `nusb` is used, no vendor
//! library.
//!
//! On boards where the CPLD and the serial console hang off the same FTDI
//! chip, claiming the channel detaches the kernel tty driver. The tty comes
//! back once the port is closed and the device re-enumerates.
//!
//! # Example
//!
//! ```no_run
//! use rcarflash_core::gpio::{DeviceLocator, GpioAdapter, GpioConfig, Pins};
//! use rcarflash_ftdi::protocol::{FTDI_FT4232H_PID, FTDI_VID};
//! use rcarflash_ftdi::FtdiAdapter;
//!
//! let adapter = FtdiAdapter::new();
//! for dev in adapter.list_devices(FTDI_VID, FTDI_FT4232H_PID)? {
//!     println!("{}", dev);
//! }
//! let locator = DeviceLocator {
//!     vid: FTDI_VID,
//!     pid: FTDI_FT4232H_PID,
//!     serial: "FT5ABCDE".into(),
//!     interface: 1,
//! };
//! let config = GpioConfig {
//!     direction: Pins::AD0 | Pins::AD1,
//!     initial: Pins::empty(),
//!     frequency: None,
//! };
//! let mut port = adapter.open(&locator, &config)?;
//! port.close()?;
//! # Ok::<(), rcarflash_core::Error>(())
//! ```

mod device;
mod error;
pub mod protocol;

pub use device::{strip_modem_status, FtdiAdapter, FtdiGpio};
pub use error::{FtdiError, Result};
