//! FTDI vendor requests and bit modes
//!
//! Based on the FTDI application notes AN_232R-01 (bit bang modes) and the
//! libftdi SIO request definitions.

// ============================================================================
// USB VID/PID constants
// ============================================================================

/// FTDI vendor ID
pub const FTDI_VID: u16 = 0x0403;

/// FT4232H product ID (quad channel)
pub const FTDI_FT4232H_PID: u16 = 0x6011;

/// Most channels on any supported chip (FT4232H: A to D)
pub const MAX_CHANNELS: u8 = 4;

// ============================================================================
// SIO control requests (bRequest)
// ============================================================================

/// Reset the port / purge buffers
pub const SIO_RESET_REQUEST: u8 = 0x00;
/// Set the baud rate (bit-bang sample clock)
pub const SIO_SET_BAUDRATE_REQUEST: u8 = 0x03;
/// Set the latency timer
pub const SIO_SET_LATENCY_TIMER_REQUEST: u8 = 0x09;
/// Set the bit mode and direction mask
pub const SIO_SET_BITMODE_REQUEST: u8 = 0x0B;

/// wValue for SIO_RESET_REQUEST: reset the port
pub const SIO_RESET_SIO: u16 = 0;
/// wValue for SIO_RESET_REQUEST: purge the RX buffer
pub const SIO_RESET_PURGE_RX: u16 = 1;
/// wValue for SIO_RESET_REQUEST: purge the TX buffer
pub const SIO_RESET_PURGE_TX: u16 = 2;

// ============================================================================
// Bit modes (high byte of wValue for SIO_SET_BITMODE_REQUEST)
// ============================================================================

/// Back to the UART / FIFO function
pub const BITMODE_RESET: u8 = 0x00;
/// Synchronous bit-bang: one pin sample read back per byte written
pub const BITMODE_SYNCBB: u8 = 0x04;

// ============================================================================
// Timing
// ============================================================================

/// Latency timer in milliseconds
pub const LATENCY_MS: u16 = 2;

/// Base clock of the baud rate generator
pub const BAUD_BASE_CLOCK: u32 = 3_000_000;

/// Bit-bang samples are clocked at this multiple of the baud rate
pub const BITBANG_CLOCK_MULTIPLIER: u32 = 16;

/// Largest integer divisor accepted by the baud rate generator
pub const MAX_DIVISOR: u32 = 0x3FFF;

/// Default sample clock for waveforms
pub const DEFAULT_FREQUENCY: u32 = 100_000;

// ============================================================================
// USB transfer layout
// ============================================================================

/// Every IN packet starts with two modem status bytes
pub const MODEM_STATUS_SIZE: usize = 2;

/// Largest chunk written in one bulk OUT transfer
pub const MAX_WRITE_CHUNK: usize = 4096;

/// Empty IN packets tolerated before giving up on a read-back
pub const MAX_EMPTY_READS: usize = 100;

/// Letter of channel `index` as printed in FTDI datasheets
pub fn channel_name(index: u8) -> Option<char> {
    (index < MAX_CHANNELS).then(|| char::from(b'A' + index))
}

// Endpoint and wIndex helpers expect `index < MAX_CHANNELS`

/// Bulk OUT endpoint of interface `index` (0 = A)
pub fn out_endpoint(index: u8) -> u8 {
    0x02 + 2 * index
}

/// Bulk IN endpoint of interface `index` (0 = A)
pub fn in_endpoint(index: u8) -> u8 {
    0x81 + 2 * index
}

/// wIndex addressing interface `index` in SIO requests
pub fn sio_index(index: u8) -> u16 {
    u16::from(index) + 1
}

/// Baud rate divisor producing roughly `frequency` samples per second
pub fn bitbang_divisor(frequency: u32) -> u16 {
    let baud = (frequency / BITBANG_CLOCK_MULTIPLIER).max(1);
    let divisor = (BAUD_BASE_CLOCK / baud).clamp(1, MAX_DIVISOR);
    divisor as u16
}
