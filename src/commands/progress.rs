//! Operator feedback while talking to the monitor

use indicatif::{ProgressBar, ProgressStyle};
use rcarflash_core::sequence::{Echo, SendProgress};
use std::io::{self, Write};

fn create_progress_bar_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%, {bytes_per_sec}, {eta})")?
        .progress_chars("#>-"))
}

/// Progress reporter using an indicatif progress bar per upload
#[derive(Default)]
pub struct IndicatifProgress {
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SendProgress for IndicatifProgress {
    fn sending(&mut self, total_bytes: usize) {
        let pb = ProgressBar::new(total_bytes as u64);
        pb.set_style(create_progress_bar_style().unwrap_or_else(|_| ProgressStyle::default_bar()));
        self.current_bar = Some(pb);
    }

    fn send_progress(&mut self, bytes_sent: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(bytes_sent as u64);
        }
    }

    fn complete(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish();
        }
    }
}

/// Prints monitor output as it arrives
#[derive(Default)]
pub struct StdoutEcho {
    /// Something was printed since the last line break
    dirty: bool,
    /// Writing to stdout failed once already
    failed: bool,
}

impl StdoutEcho {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log the first failed write, ignore later ones
    fn record(&mut self, result: io::Result<()>) {
        if let Err(e) = result {
            if !self.failed {
                log::debug!("Cannot echo monitor output: {}", e);
                self.failed = true;
            }
        }
    }
}

fn write_byte(out: &mut impl Write, byte: u8) -> io::Result<()> {
    out.write_all(&[byte])?;
    out.flush()
}

impl Echo for StdoutEcho {
    fn echo(&mut self, byte: u8) {
        let result = write_byte(&mut io::stdout().lock(), byte);
        self.record(result);
        self.dirty = byte != b'\n';
    }

    fn matched(&mut self) {
        if self.dirty {
            println!();
            self.dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_echo_write_failure_recorded_once() {
        let mut echo = StdoutEcho::new();
        echo.record(write_byte(&mut Vec::new(), b'a'));
        assert!(!echo.failed);

        echo.record(write_byte(&mut BrokenPipe, b'a'));
        assert!(echo.failed);
        echo.record(write_byte(&mut BrokenPipe, b'b'));
        assert!(echo.failed);
    }

    #[test]
    fn test_matched_ends_the_line() {
        let mut echo = StdoutEcho::new();
        echo.echo(b'>');
        assert!(echo.dirty);
        echo.matched();
        assert!(!echo.dirty);
    }
}
