//! Error types for the FTDI GPIO adapter

use std::fmt;

/// Result type for FTDI operations
pub type Result<T> = std::result::Result<T, FtdiError>;

/// Errors that can occur while driving an FTDI adapter
#[derive(Debug)]
pub enum FtdiError {
    /// No FTDI device with the requested serial number
    DeviceNotFound(String),

    /// Failed to open device
    OpenFailed(String),

    /// Failed to claim USB interface
    ClaimFailed(String),

    /// USB transfer failed
    TransferFailed(String),

    /// The adapter returned fewer samples than were clocked out
    ShortRead { expected: usize, got: usize },

    /// Operation on a closed port
    Closed,

    /// USB enumeration error
    UsbError(String),
}

impl fmt::Display for FtdiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtdiError::DeviceNotFound(s) => {
                write!(f, "No FTDI device with serial number {} found", s)
            }
            FtdiError::OpenFailed(s) => write!(f, "Failed to open device: {}", s),
            FtdiError::ClaimFailed(s) => write!(f, "Failed to claim interface: {}", s),
            FtdiError::TransferFailed(s) => write!(f, "USB transfer failed: {}", s),
            FtdiError::ShortRead { expected, got } => {
                write!(f, "Expected {} pin samples, got {}", expected, got)
            }
            FtdiError::Closed => write!(f, "GPIO port already closed"),
            FtdiError::UsbError(s) => write!(f, "USB error: {}", s),
        }
    }
}

impl std::error::Error for FtdiError {}

impl From<nusb::Error> for FtdiError {
    fn from(e: nusb::Error) -> Self {
        FtdiError::UsbError(e.to_string())
    }
}

impl From<FtdiError> for rcarflash_core::Error {
    fn from(e: FtdiError) -> Self {
        match e {
            FtdiError::ShortRead { .. } => {
                log::debug!("{}", e);
                rcarflash_core::error::TimeoutError::Adapter.into()
            }
            other => rcarflash_core::Error::Io(other.to_string()),
        }
    }
}
