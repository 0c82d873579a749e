//! Flash sequence engine
//!
//! Interprets a [`FlashTarget`] event list against a [`Transport`]. Every
//! event waits for a token at the tail of the monitor output and then sends
//! one computed value. The dialog always starts with a carriage return to
//! wake the prompt and ends with a wait for the idle prompt.

use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::config::{FlashEvent, FlashTarget, SendKind};
use crate::error::{FileError, Result, TimeoutError};
use crate::srec;
use crate::transport::{TimeoutGuard, Transport};

/// Size of one write when streaming an image
pub const CHUNK_SIZE: usize = 10 * 1024;

/// Monitor prompt printed when it is ready for a command
pub const PROMPT: &str = ">";

/// Command that switches the flash writer to its high-speed baud rate
const SUP_COMMAND: &[u8] = b"sup\r";

/// Tail of the notice printed before the flash writer changes speed
const SUP_NOTICE: &str = "setting of the terminal.";

/// Sink for monitor output shown to the operator
pub trait Echo {
    /// Called with every printable byte received from the monitor
    fn echo(&mut self, byte: u8);

    /// Called after a token was matched
    fn matched(&mut self) {}
}

/// Echo sink that discards everything
pub struct NoEcho;

impl Echo for NoEcho {
    fn echo(&mut self, _byte: u8) {}
}

/// Progress callbacks for streamed uploads
pub trait SendProgress {
    /// Called before the first chunk
    fn sending(&mut self, total_bytes: usize);

    /// Called after each chunk with the cumulative byte count
    fn send_progress(&mut self, bytes_sent: usize);

    /// Called once the last chunk was written
    fn complete(&mut self);
}

/// A no-op progress reporter
pub struct NoProgress;

impl SendProgress for NoProgress {
    fn sending(&mut self, _total_bytes: usize) {}
    fn send_progress(&mut self, _bytes_sent: usize) {}
    fn complete(&mut self) {}
}

fn is_printable(byte: u8) -> bool {
    byte.is_ascii_graphic() || matches!(byte, b' ' | b'\r' | b'\n' | b'\t')
}

/// Block until the monitor output ends with `token`
///
/// Reads one byte at a time so nothing past the token is consumed. The
/// whole wait is bounded by the transport's current timeout: no single read
/// may block past the deadline.
pub fn wait_for<T: Transport + ?Sized>(
    transport: &mut T,
    echo: &mut dyn Echo,
    token: &str,
) -> Result<()> {
    let token_bytes = token.as_bytes();
    let start = Instant::now();
    let deadline = start + transport.timeout();
    let mut seen = Vec::new();
    let mut byte = [0u8; 1];

    log::trace!("Waiting for {:?}", token);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TimeoutError::Token {
                token: token.to_string(),
                elapsed: start.elapsed(),
            }
            .into());
        }
        if transport.read_within(&mut byte, remaining)? == 0 {
            continue;
        }
        seen.push(byte[0]);
        if is_printable(byte[0]) {
            echo.echo(byte[0]);
        }
        if seen.ends_with(token_bytes) {
            echo.matched();
            return Ok(());
        }
    }
}

/// Loader image whose derived values are computed on first use
struct Image<'p> {
    path: &'p Path,
    data: Option<Vec<u8>>,
}

impl<'p> Image<'p> {
    fn new(path: &'p Path) -> Self {
        Self { path, data: None }
    }

    fn data(&mut self) -> Result<&[u8]> {
        if self.data.is_none() {
            let data = fs::read(self.path).map_err(|source| FileError::Read {
                path: self.path.to_path_buf(),
                source,
            })?;
            self.data = Some(data);
        }
        Ok(self.data.as_deref().unwrap_or_default())
    }
}

/// Drives the serial monitor through flash target dialogs
pub struct FlashSequenceEngine<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    echo: &'a mut dyn Echo,
    progress: &'a mut dyn SendProgress,
}

impl<'a, T: Transport + ?Sized> FlashSequenceEngine<'a, T> {
    pub fn new(
        transport: &'a mut T,
        echo: &'a mut dyn Echo,
        progress: &'a mut dyn SendProgress,
    ) -> Self {
        Self {
            transport,
            echo,
            progress,
        }
    }

    /// Send raw bytes
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        log::trace!("Sending {} bytes", data.len());
        self.transport.write(data)
    }

    /// Wait for `token` using the current transport timeout
    pub fn wait_for(&mut self, token: &str) -> Result<()> {
        wait_for(&mut *self.transport, &mut *self.echo, token)
    }

    /// Stream `data` in [`CHUNK_SIZE`] pieces, reporting progress per chunk
    pub fn send_chunked(&mut self, data: &[u8]) -> Result<()> {
        let total = data.len();
        let mut sent = 0;
        self.progress.sending(total);
        for chunk in data.chunks(CHUNK_SIZE) {
            self.transport.write(chunk)?;
            sent += chunk.len();
            self.progress.send_progress(sent);
            log::trace!("Sent {}/{} bytes ({}%)", sent, total, sent * 100 / total);
        }
        self.progress.complete();
        Ok(())
    }

    /// Upload the flash writer stub and wait for its prompt
    pub fn send_flash_writer(&mut self, path: &Path) -> Result<()> {
        log::info!("Sending flash writer {}", path.display());
        let data = fs::read(path).map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.send_chunked(&data)?;
        self.wait_for(PROMPT)
    }

    /// Ask the flash writer to switch to `baud` and follow it
    pub fn switch_speed(&mut self, baud: u32) -> Result<()> {
        log::info!("Switching monitor to {} baud", baud);
        self.send(SUP_COMMAND)?;
        self.wait_for(SUP_NOTICE)?;
        self.transport.set_baud_rate(baud)?;
        self.send(b"\r")?;
        self.wait_for(PROMPT)
    }

    /// Run `target`'s dialog for one loader image
    pub fn flash_loader(&mut self, image: &Path, flash_addr: u64, target: &FlashTarget) -> Result<()> {
        log::debug!(
            "Running flash target {} ({} events) for {}",
            target.name,
            target.events.len(),
            image.display()
        );
        let mut image = Image::new(image);

        self.send(b"\r")?;
        for (index, event) in target.events.iter().enumerate() {
            log::trace!("Event {}: wait for {:?}", index, event.wait_for);
            self.run_event(event, &mut image, flash_addr)?;
        }
        self.wait_for(PROMPT)
    }

    fn run_event(&mut self, event: &FlashEvent, image: &mut Image<'_>, flash_addr: u64) -> Result<()> {
        {
            let mut guard = TimeoutGuard::new(&mut *self.transport, event.timeout)?;
            wait_for(&mut *guard, &mut *self.echo, &event.wait_for)?;
        }

        match &event.send {
            SendKind::ImgAddr => {
                let addr = srec::load_address(image.path)?;
                self.send(format!("{}\r", addr).as_bytes())
            }
            SendKind::FileSize => {
                let size = image.data()?.len();
                self.send(format!("{:X}\r", size).as_bytes())
            }
            SendKind::FlashAddr => self.send(format!("{:X}\r", flash_addr).as_bytes()),
            SendKind::Const(value) => self.send(value.as_bytes()),
            SendKind::File => {
                let path = image.path;
                let data = image.data()?;
                log::info!("Sending {} ({} bytes)", path.display(), data.len());
                self.send_chunked(data)
            }
        }
    }
}
