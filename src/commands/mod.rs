//! CLI command implementations
//!
//! `flash` drives the whole bring-up: optional CPLD mode switch, serial
//! monitor dialog per loader, optional mode restore. The list commands
//! only read the configuration.

mod flash;
mod list;
mod progress;

pub use flash::{cmd_flash, FlashOptions};
pub use list::{list_boards, list_loaders};
