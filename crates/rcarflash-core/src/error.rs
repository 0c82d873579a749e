//! Error types for rcarflash-core
//!
//! Every failure in a run is terminal. The kinds below are grouped the way
//! the operator has to react to them: fix the configuration, fix the files,
//! check the wiring, or pick the adapter explicitly.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration problems (unknown names, bad tags, missing values)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Board name not present in the configuration
    #[error("Board {0} is not found in the provided configuration file")]
    UnknownBoard(String),

    /// Loader name not present in the board's `ipls` table
    #[error("Unknown loader name: {0}")]
    UnknownLoader(String),

    /// Loader references a flash target that does not exist
    #[error("Unknown flash target {target} (used by loader {loader})")]
    UnknownFlashTarget { loader: String, target: String },

    /// Board references a CPLD profile that does not exist
    #[error("Unknown CPLD profile {profile} (used by board {board})")]
    UnknownCpldProfile { board: String, profile: String },

    /// Board has no CPLD profile but CPLD assist was requested
    #[error("Board {0} has no CPLD profile")]
    NoCpldProfile(String),

    /// CPLD protocol tag is neither `i2c` nor `spi`
    #[error("Unknown CPLD protocol: {0}")]
    UnknownProtocol(String),

    /// Register command name is missing from the CPLD profile
    #[error("CPLD profile has no `{0}` command")]
    UnknownCommand(String),

    /// Flash event send tag is not one of the supported kinds
    #[error("Unknown value to send: {0}")]
    UnknownSendKind(String),

    /// A required value is absent
    #[error("Missing value: {0}")]
    MissingValue(String),

    /// A value is present but out of range or malformed
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// `all` was combined with explicit loader names
    #[error("You can either use 'all' or define list of loaders")]
    AllWithOthers,

    /// CPLD assist requested but no GPIO adapter backend is available
    #[error("CPLD support is not available in this build")]
    CpldUnsupported,

    /// The configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Missing or unreadable files
#[derive(Debug, Error)]
pub enum FileError {
    /// Loader or flash-writer file does not exist
    #[error("File {} for {what} does not exist", .path.display())]
    NotFound { what: String, path: PathBuf },

    /// File exists but reading it failed
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Firmware image format problems
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// No `S3` record among the scanned lines
    #[error("Could not read srec load address (S3) from {}", .0.display())]
    NoLoadAddress(PathBuf),
}

/// Something expected did not happen in time
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeoutError {
    /// Monitor did not print the expected token
    #[error("Timeout waiting for `{token}` from the device (after {elapsed:?})")]
    Token { token: String, elapsed: Duration },

    /// I2C target kept SCL low for longer than allowed
    #[error("I2C clock stretching exceeded {0:?}")]
    ClockStretch(Duration),

    /// GPIO adapter stopped answering
    #[error("GPIO adapter did not respond")]
    Adapter,
}

/// Bus-level protocol failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// I2C target did not acknowledge a byte
    #[error("I2C NAK while writing byte 0x{0:02X}")]
    Nak(u8),

    /// CPLD revision register does not hold the expected value
    #[error("CPLD revision mismatch: expected {expected:02X?}, got {got:02X?}")]
    RevisionMismatch { expected: Vec<u8>, got: Vec<u8> },
}

/// A USB adapter candidate shown to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// USB serial number
    pub serial: String,
    /// Product description string
    pub description: String,
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.serial, self.description)
    }
}

fn format_candidates(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| format!("\n  {}", c))
        .collect::<String>()
}

/// Adapter discovery failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceResolutionError {
    /// No adapter with the profile's VID:PID is attached
    #[error("No USB adapter {vid:04x}:{pid:04x} found")]
    NotFound { vid: u16, pid: u16 },

    /// Several adapters match and nothing tells them apart
    #[error(
        "Several USB adapters found, select one with --cpld <serial>:{}",
        format_candidates(.candidates)
    )]
    Ambiguous { candidates: Vec<Candidate> },

    /// No serial port belongs to the adapter with this serial number
    #[error("Can't find serial port for device with serial number {0}")]
    NoSerialPort(String),
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    DeviceResolution(#[from] DeviceResolutionError),

    /// Transport or adapter I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;
