//! rcarflash-core - Flash-sequence engine and CPLD drivers
//!
//! This crate holds everything that does not depend on a particular USB
//! adapter or serial port implementation:
//!
//! - [`config`] - board, loader, flash-target and CPLD profile tables
//! - [`sequence`] - the monitor dialog interpreter
//! - [`cpld`] - bit-banged I2C and register protocols behind [`cpld::ModeController`]
//! - [`resolver`] - picks the CPLD adapter and the monitor's serial port
//!
//! Hardware is reached through two traits: [`transport::Transport`] for the
//! serial monitor and [`gpio::GpioPort`] for the CPLD adapter.
//!
//! # Example
//!
//! ```ignore
//! use rcarflash_core::{config::Config, sequence::*};
//!
//! let config = Config::load("rcar_flash.yaml".as_ref())?;
//! let board = config.board("salvator-x")?;
//! let ipl = board.ipl("bootparam")?;
//! let target = config.flash_target_for(ipl)?;
//! FlashSequenceEngine::new(&mut port, &mut NoEcho, &mut NoProgress)
//!     .flash_loader(&ipl.file, ipl.flash_addr, target)?;
//! ```

#![warn(rust_2018_idioms)]

pub mod config;
pub mod cpld;
pub mod error;
pub mod gpio;
pub mod loaders;
pub mod resolver;
pub mod sequence;
pub mod srec;
pub mod transport;

pub use error::{Error, Result};
