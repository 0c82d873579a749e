//! The flash command
//!
//! Everything that can be checked from the configuration and the file
//! system is checked before the first device is opened.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use rcarflash_core::config::{BoardProfile, Config, CpldProfile, FlashTarget};
use rcarflash_core::cpld::{self, ModeController};
use rcarflash_core::error::{ConfigError, Result};
use rcarflash_core::gpio::GpioAdapter;
use rcarflash_core::loaders::{self, PlannedLoader};
use rcarflash_core::resolver::{self, ResolvedDevice};
use rcarflash_core::sequence::FlashSequenceEngine;
use rcarflash_core::transport::Transport;
use rcarflash_serial::{SerialTransport, SystemPorts, DEFAULT_TIMEOUT};

use super::progress::{IndicatifProgress, StdoutEcho};

/// Options of one flash run
#[derive(Debug, Clone, Default)]
pub struct FlashOptions {
    pub board: String,
    /// `name`, `name:path` or `all`
    pub loaders: Vec<String>,
    /// Directory for loader files named in the configuration
    pub path: PathBuf,
    /// Explicit serial console device
    pub serial: Option<String>,
    /// `Some(None)` uploads the board's default flash writer
    pub flash_writer: Option<Option<PathBuf>>,
    /// `Some(None)` picks the CPLD adapter automatically
    pub cpld: Option<Option<String>>,
}

/// Target mode of a CPLD session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootMode {
    SerialDownload,
    Normal,
}

/// CPLD adapter picked for this run
struct CpldSession<'c> {
    adapter: &'c dyn GpioAdapter,
    profile: &'c CpldProfile,
    device: ResolvedDevice,
}

impl CpldSession<'_> {
    /// Open the adapter, switch the boot mode, reset the board and release the adapter
    fn switch(&self, mode: BootMode) -> Result<()> {
        let port = self.adapter.open(
            &self.device.locator(self.profile),
            &cpld::gpio_config(self.profile.protocol),
        )?;
        let mut controller = ModeController::new(port, self.profile)?;
        controller.check_revision()?;
        match mode {
            BootMode::SerialDownload => controller.serial_mode()?,
            BootMode::Normal => controller.normal_mode()?,
        }
        controller.reset()?;
        controller.release()?;
        log::info!("Board switched to {:?} boot mode", mode);
        Ok(())
    }
}

/// Flash the selected loaders onto a board
pub fn cmd_flash(
    config: &Config,
    options: &FlashOptions,
    adapter: Option<&dyn GpioAdapter>,
) -> Result<()> {
    let board = config.board(&options.board)?;
    log::info!("Reading config for board {}", board.name);

    let plan = loaders::plan_loaders(board, &options.loaders, &options.path)?;
    let mut steps = Vec::with_capacity(plan.len());
    for loader in &plan {
        let target = config.flash_target_for(board.ipl(&loader.name)?)?;
        steps.push((loader, target));
    }

    let flash_writer = match &options.flash_writer {
        Some(explicit) => Some(loaders::flash_writer_path(
            board,
            explicit.as_deref(),
            &options.path,
        )?),
        None => None,
    };

    let cpld = match &options.cpld {
        Some(serial) => {
            let adapter = adapter.ok_or(ConfigError::CpldUnsupported)?;
            Some((adapter, config.cpld_profile_for(board)?, serial.as_deref()))
        }
        None => None,
    };

    log::info!("We are going to flash the following loaders");
    log::info!("---");
    for loader in &plan {
        log::info!("{:24} : {}", loader.name, loader.file.display());
    }
    log::info!("---");

    let ports = SystemPorts::new();
    let session = match cpld {
        Some((adapter, profile, explicit)) => {
            let device = resolver::resolve(
                explicit,
                profile,
                options.serial.as_deref(),
                adapter,
                &ports,
            )?;
            let session = CpldSession {
                adapter,
                profile,
                device,
            };
            session.switch(BootMode::SerialDownload)?;
            Some(session)
        }
        None => None,
    };

    // Releasing the adapter hands its channels back to the serial driver
    let settle = match session {
        Some(_) => resolver::PORT_SETTLE_TIMEOUT,
        None => Duration::ZERO,
    };
    let device = resolver::serial_device(
        options.serial.as_deref(),
        session.as_ref().map(|s| s.device.serial.as_str()),
        &ports,
        settle,
    )?;
    let mut transport = open_serial(&device, board.baud, settle)?;

    let result = run_sequences(
        &mut transport,
        board,
        flash_writer.as_deref(),
        session.is_some(),
        &steps,
    );
    let closed = transport.close();
    result?;
    closed?;

    if let Some(session) = &session {
        session.switch(BootMode::Normal)?;
    }

    log::info!("All done! You might need to reboot your board");
    Ok(())
}

/// Open the monitor's serial port, retrying for up to `settle`
fn open_serial(device: &str, baud: u32, settle: Duration) -> Result<SerialTransport> {
    let deadline = Instant::now() + settle;
    loop {
        match SerialTransport::open(device, baud, DEFAULT_TIMEOUT) {
            Ok(transport) => return Ok(transport),
            Err(e) if Instant::now() < deadline => {
                log::debug!("{} not ready yet: {}", device, e);
                thread::sleep(resolver::PORT_POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn run_sequences<T: Transport + ?Sized>(
    transport: &mut T,
    board: &BoardProfile,
    flash_writer: Option<&Path>,
    cpld_assist: bool,
    steps: &[(&PlannedLoader, &FlashTarget)],
) -> Result<()> {
    let mut echo = StdoutEcho::new();
    let mut progress = IndicatifProgress::new();
    let mut engine = FlashSequenceEngine::new(transport, &mut echo, &mut progress);

    match flash_writer {
        Some(path) => {
            if !cpld_assist {
                log::info!("Please ensure that board is in the serial download mode");
            }
            engine.send_flash_writer(path)?;
            if let Some(baud) = board.sup_baud {
                engine.switch_speed(baud)?;
            }
        }
        None => log::info!("Please ensure that board is in Monitor mode"),
    }

    for (loader, target) in steps {
        log::info!(
            "Writing {} ({}) at 0x{:x} using {}",
            loader.name,
            loader.file.display(),
            loader.flash_addr,
            target.name
        );
        engine.flash_loader(&loader.file, loader.flash_addr, target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcarflash_core::error::{Candidate, Error, FileError};
    use rcarflash_core::gpio::{DeviceLocator, GpioConfig, GpioPort};
    use std::cell::Cell;
    use std::fs;

    const CONFIG: &str = r#"
board:
  salvator:
    flash_writer: writer.mot
    cpld_profile: salvator-cpld
    ipls:
      bl2:
        flash_addr: 0x40000
        file: bl2.srec
        flash_target: spiflash
flash_target:
  spiflash:
    sequence:
      - wait_for: "Please Input Start Address"
        send: flash_addr
cpld_profiles:
  salvator-cpld:
    protocol: spi
    usb_vid: 0x0403
    usb_pid: 0x6001
    reset: { addr: 0x24, data: [1] }
    serial_mode: { addr: 0x08, data: [0x0C] }
    normal_mode: { addr: 0x08, data: [0x00] }
"#;

    /// Adapter that counts enumerations and refuses to open anything
    struct CountingAdapter(Cell<usize>);

    impl GpioAdapter for CountingAdapter {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn list_devices(&self, _vid: u16, _pid: u16) -> Result<Vec<Candidate>> {
            self.0.set(self.0.get() + 1);
            Ok(Vec::new())
        }

        fn open(&self, _locator: &DeviceLocator, _config: &GpioConfig) -> Result<Box<dyn GpioPort>> {
            self.0.set(self.0.get() + 1);
            Err(Error::Io("not attached".into()))
        }
    }

    fn options(dir: &Path, loaders: &[&str]) -> FlashOptions {
        FlashOptions {
            board: "salvator".into(),
            loaders: loaders.iter().map(|s| s.to_string()).collect(),
            path: dir.to_path_buf(),
            serial: Some("/nonexistent/tty".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_all_with_others_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bl2.srec"), "S00600004844521B\n").unwrap();
        let config = Config::from_yaml_str(CONFIG).unwrap();
        let adapter = CountingAdapter(Cell::new(0));
        let mut opts = options(dir.path(), &["all", "bl2"]);
        opts.cpld = Some(None);

        let err = cmd_flash(&config, &opts, Some(&adapter)).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::AllWithOthers)));
        assert_eq!(adapter.0.get(), 0);
    }

    #[test]
    fn test_missing_flash_writer_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bl2.srec"), "S00600004844521B\n").unwrap();
        let config = Config::from_yaml_str(CONFIG).unwrap();
        let adapter = CountingAdapter(Cell::new(0));
        let mut opts = options(dir.path(), &["bl2"]);
        opts.flash_writer = Some(None);
        opts.cpld = Some(None);

        let err = cmd_flash(&config, &opts, Some(&adapter)).unwrap_err();
        assert!(matches!(err, Error::File(FileError::NotFound { .. })));
        assert_eq!(adapter.0.get(), 0);
    }

    #[test]
    fn test_cpld_without_adapter_capability() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bl2.srec"), "S00600004844521B\n").unwrap();
        let config = Config::from_yaml_str(CONFIG).unwrap();
        let mut opts = options(dir.path(), &["bl2"]);
        opts.cpld = Some(Some("FT1234".into()));

        let err = cmd_flash(&config, &opts, None).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::CpldUnsupported)));
    }

    #[test]
    fn test_cpld_adapter_failure_stops_before_serial() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bl2.srec"), "S00600004844521B\n").unwrap();
        let config = Config::from_yaml_str(CONFIG).unwrap();
        let adapter = CountingAdapter(Cell::new(0));
        let mut opts = options(dir.path(), &["bl2"]);
        opts.cpld = Some(Some("FT1234".into()));

        let err = cmd_flash(&config, &opts, Some(&adapter)).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        // explicit serial skips enumeration, then one open attempt
        assert_eq!(adapter.0.get(), 1);
    }

    #[test]
    fn test_open_serial_retries_until_settled() {
        let start = Instant::now();
        assert!(open_serial("/nonexistent/tty", 115_200, Duration::ZERO).is_err());
        assert!(start.elapsed() < resolver::PORT_POLL_INTERVAL);

        let settle = Duration::from_millis(250);
        let start = Instant::now();
        assert!(open_serial("/nonexistent/tty", 115_200, settle).is_err());
        assert!(start.elapsed() >= settle);
    }
}
