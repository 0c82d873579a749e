//! Error types for the serial transport

use thiserror::Error;

/// Serial transport errors
#[derive(Debug, Error)]
pub enum SerialError {
    /// Failed to open the device
    #[error("Failed to open {device}: {source}")]
    OpenFailed {
        device: String,
        #[source]
        source: serialport::Error,
    },

    /// I/O error during communication
    #[error("I/O error: {0}")]
    IoError(String),

    /// Serial port error
    #[error("Serial port error: {0}")]
    SerialError(#[from] serialport::Error),
}

/// Result type for serial operations
pub type Result<T> = core::result::Result<T, SerialError>;

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        SerialError::IoError(e.to_string())
    }
}

impl From<SerialError> for rcarflash_core::Error {
    fn from(e: SerialError) -> Self {
        rcarflash_core::Error::Io(e.to_string())
    }
}
