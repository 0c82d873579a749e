//! Board, loader, flash-target and CPLD profile configuration
//!
//! The YAML file is deserialized into loosely typed `Raw*` tables first and
//! then converted into validated, immutable snapshots. All cross references
//! (loader -> flash target, board -> CPLD profile) are checked here so the
//! rest of the run never sees a dangling name.
//!
//! ```yaml
//! board:
//!   salvator-x:
//!     flash_writer: AArch64_Flash_writer_SCIF_DUMMY_CERT_E6300400_salvator-x.mot
//!     baud: 115200
//!     sup_baud: 921600
//!     cpld_profile: salvator
//!     ipls:
//!       bootparam:
//!         flash_addr: 0x0
//!         file: bootparam_sa0.srec
//!         flash_target: hyperflash
//! flash_target:
//!   hyperflash:
//!     sequence:
//!       - { wait_for: ">", send: const, val: "xls2\r" }
//!       - { wait_for: "(Push Y key)", send: const, val: "3" }
//!       - { wait_for: "Program Top Address", send: img_addr }
//!       - { wait_for: "Qspi/HyperFlash Save Address", send: flash_addr }
//!       - { wait_for: "please send !", send: file, timeout: 60 }
//! cpld_profiles:
//!   salvator:
//!     protocol: spi
//!     usb_vid: 0x0403
//!     usb_pid: 0x6011
//!     usb_interface: 1
//!     reset: { addr: 0x24, data: [0, 0, 0, 1] }
//!     serial_mode: { addr: 0x08, data: [0, 0, 0, 0x0C] }
//!     normal_mode: { addr: 0x08, data: [0, 0, 0, 0x00] }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, FileError, Result};

/// Default serial baud rate when a board does not specify one
pub const DEFAULT_BAUD: u32 = 115_200;

/// Name of the revision check command in a CPLD profile
pub const REVISION_COMMAND: &str = "revision";

/// Highest adapter channel index (quad-channel parts: A to D)
pub const MAX_USB_INTERFACE: u8 = 3;

// ============================================================================
// Validated snapshots
// ============================================================================

/// Whole configuration file
#[derive(Debug, Clone)]
pub struct Config {
    boards: BTreeMap<String, BoardProfile>,
    flash_targets: BTreeMap<String, FlashTarget>,
    cpld_profiles: BTreeMap<String, CpldProfile>,
}

/// One board description
#[derive(Debug, Clone)]
pub struct BoardProfile {
    /// Board name (key in the `board` table)
    pub name: String,
    /// Default flash writer file
    pub flash_writer: PathBuf,
    /// Monitor baud rate
    pub baud: u32,
    /// Baud rate after the `sup` speed switch, if the flash writer supports it
    pub sup_baud: Option<u32>,
    /// CPLD profile key, if the board has a mode-select CPLD
    pub cpld_profile: Option<String>,
    /// Loaders in configuration-file order
    pub ipls: Vec<IplEntry>,
}

/// One initial program loader that can be flashed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IplEntry {
    /// Loader name
    pub name: String,
    /// Default image file
    pub file: PathBuf,
    /// Destination address in flash
    pub flash_addr: u64,
    /// Key into the flash target table
    pub flash_target: String,
}

/// Monitor dialog used to place one image
#[derive(Debug, Clone, PartialEq)]
pub struct FlashTarget {
    /// Target name
    pub name: String,
    /// Ordered events; none may be skipped or reordered
    pub events: Vec<FlashEvent>,
}

/// One "wait for token, then send" step
#[derive(Debug, Clone, PartialEq)]
pub struct FlashEvent {
    /// Token that must appear at the tail of the monitor output
    pub wait_for: String,
    /// What to send once the token was seen
    pub send: SendKind,
    /// Timeout override for this wait only
    pub timeout: Option<Duration>,
}

/// Value sent after a token match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendKind {
    /// S-record load address of the image, CR terminated
    ImgAddr,
    /// Image size in uppercase hex, CR terminated
    FileSize,
    /// Loader flash address in uppercase hex, CR terminated
    FlashAddr,
    /// Literal string, sent verbatim
    Const(String),
    /// Whole image, chunked
    File,
}

impl SendKind {
    /// Parse a send tag, pulling the literal for `const` from `val`
    pub fn parse(tag: &str, val: Option<&str>) -> core::result::Result<Self, ConfigError> {
        match tag {
            "img_addr" => Ok(SendKind::ImgAddr),
            "file_size" => Ok(SendKind::FileSize),
            "flash_addr" => Ok(SendKind::FlashAddr),
            "file" => Ok(SendKind::File),
            "const" => val
                .map(|v| SendKind::Const(v.to_string()))
                .ok_or_else(|| ConfigError::MissingValue("`val` for const event".into())),
            other => Err(ConfigError::UnknownSendKind(other.to_string())),
        }
    }
}

/// Bus protocol of the mode-select CPLD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpldProtocol {
    /// I2C with the given 7-bit device address
    I2c { dev_addr: u8 },
    /// Synchronous bit-banged register protocol
    Spi,
}

impl CpldProtocol {
    /// Resolve the protocol tag, taking the device address for I2C
    pub fn parse(tag: &str, dev_addr: Option<u8>) -> core::result::Result<Self, ConfigError> {
        match tag {
            "i2c" => {
                let dev_addr = dev_addr
                    .ok_or_else(|| ConfigError::MissingValue("`dev_addr` for i2c profile".into()))?;
                if dev_addr > 0x7F {
                    return Err(ConfigError::InvalidValue(format!(
                        "I2C device address 0x{:02X} is not a 7-bit address",
                        dev_addr
                    )));
                }
                Ok(CpldProtocol::I2c { dev_addr })
            }
            "spi" => Ok(CpldProtocol::Spi),
            other => Err(ConfigError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Register write (or read-back check) issued to the CPLD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCommand {
    /// Register address
    pub addr: u16,
    /// Bytes to write, in order
    pub data: Vec<u8>,
    /// Expected read-back bytes (only for `revision`)
    pub expected: Option<Vec<u8>>,
}

/// Everything needed to talk to one kind of CPLD
#[derive(Debug, Clone, PartialEq)]
pub struct CpldProfile {
    /// Profile name
    pub name: String,
    /// Bus protocol
    pub protocol: CpldProtocol,
    /// USB vendor id of the GPIO adapter
    pub usb_vid: u16,
    /// USB product id of the GPIO adapter
    pub usb_pid: u16,
    /// Adapter channel wired to the CPLD (0 = first)
    pub usb_interface: u8,
    /// Named register commands (`reset`, `serial_mode`, `normal_mode`, `revision`)
    pub commands: BTreeMap<String, RegisterCommand>,
}

impl CpldProfile {
    /// Look up a named register command
    pub fn command(&self, name: &str) -> core::result::Result<&RegisterCommand, ConfigError> {
        self.commands
            .get(name)
            .ok_or_else(|| ConfigError::UnknownCommand(name.to_string()))
    }

    /// The revision check, if the profile has one
    pub fn revision(&self) -> Option<&RegisterCommand> {
        self.commands.get(REVISION_COMMAND)
    }
}

impl BoardProfile {
    /// Look up a loader by name
    pub fn ipl(&self, name: &str) -> core::result::Result<&IplEntry, ConfigError> {
        self.ipls
            .iter()
            .find(|ipl| ipl.name == name)
            .ok_or_else(|| ConfigError::UnknownLoader(name.to_string()))
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FileError::NotFound {
                what: "configuration".into(),
                path: path.to_path_buf(),
            }
            .into());
        }
        let text = fs::read_to_string(path).map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(Self::from_yaml_str(&text)?)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml_str(text: &str) -> core::result::Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        raw.validate()
    }

    /// Look up a board by name
    pub fn board(&self, name: &str) -> core::result::Result<&BoardProfile, ConfigError> {
        self.boards
            .get(name)
            .ok_or_else(|| ConfigError::UnknownBoard(name.to_string()))
    }

    /// All boards, sorted by name
    pub fn boards(&self) -> impl Iterator<Item = &BoardProfile> {
        self.boards.values()
    }

    /// Look up a flash target by name
    pub fn flash_target(&self, name: &str) -> Option<&FlashTarget> {
        self.flash_targets.get(name)
    }

    /// Flash target used by a loader
    pub fn flash_target_for(
        &self,
        ipl: &IplEntry,
    ) -> core::result::Result<&FlashTarget, ConfigError> {
        self.flash_target(&ipl.flash_target)
            .ok_or_else(|| ConfigError::UnknownFlashTarget {
                loader: ipl.name.clone(),
                target: ipl.flash_target.clone(),
            })
    }

    /// CPLD profile of a board
    pub fn cpld_profile_for(
        &self,
        board: &BoardProfile,
    ) -> core::result::Result<&CpldProfile, ConfigError> {
        let key = board
            .cpld_profile
            .as_ref()
            .ok_or_else(|| ConfigError::NoCpldProfile(board.name.clone()))?;
        self.cpld_profiles
            .get(key)
            .ok_or_else(|| ConfigError::UnknownCpldProfile {
                board: board.name.clone(),
                profile: key.clone(),
            })
    }
}

// ============================================================================
// Raw YAML tables
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawConfig {
    board: BTreeMap<String, RawBoard>,
    #[serde(default)]
    flash_target: BTreeMap<String, RawFlashTarget>,
    #[serde(default)]
    cpld_profiles: BTreeMap<String, RawCpldProfile>,
}

#[derive(Debug, Deserialize)]
struct RawBoard {
    flash_writer: PathBuf,
    baud: Option<u32>,
    sup_baud: Option<u32>,
    cpld_profile: Option<String>,
    // Mapping keeps file order, which is the order `all` flashes in
    #[serde(default)]
    ipls: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
struct RawIpl {
    flash_addr: u64,
    file: PathBuf,
    flash_target: String,
}

#[derive(Debug, Deserialize)]
struct RawFlashTarget {
    sequence: Vec<RawFlashEvent>,
}

#[derive(Debug, Deserialize)]
struct RawFlashEvent {
    wait_for: String,
    send: String,
    val: Option<String>,
    timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawCpldProfile {
    protocol: String,
    usb_vid: u16,
    usb_pid: u16,
    #[serde(default)]
    usb_interface: u8,
    dev_addr: Option<u8>,
    #[serde(flatten)]
    commands: BTreeMap<String, RawRegisterCommand>,
}

#[derive(Debug, Deserialize)]
struct RawRegisterCommand {
    addr: u16,
    #[serde(default)]
    data: Vec<u8>,
    expected: Option<Vec<u8>>,
}

impl RawFlashEvent {
    fn validate(self, target: &str) -> core::result::Result<FlashEvent, ConfigError> {
        let send = SendKind::parse(&self.send, self.val.as_deref())?;
        let timeout = match self.timeout {
            Some(secs) if !secs.is_finite() || secs <= 0.0 => {
                return Err(ConfigError::InvalidValue(format!(
                    "timeout {} in flash target {}",
                    secs, target
                )))
            }
            Some(secs) => Some(Duration::from_secs_f64(secs)),
            None => None,
        };
        if self.wait_for.is_empty() {
            return Err(ConfigError::MissingValue(format!(
                "`wait_for` in flash target {}",
                target
            )));
        }
        Ok(FlashEvent {
            wait_for: self.wait_for,
            send,
            timeout,
        })
    }
}

impl RawConfig {
    fn validate(self) -> core::result::Result<Config, ConfigError> {
        let mut flash_targets = BTreeMap::new();
        for (name, raw) in self.flash_target {
            let events = raw
                .sequence
                .into_iter()
                .map(|e| e.validate(&name))
                .collect::<core::result::Result<Vec<_>, _>>()?;
            flash_targets.insert(name.clone(), FlashTarget { name, events });
        }

        let mut cpld_profiles = BTreeMap::new();
        for (name, raw) in self.cpld_profiles {
            let protocol = CpldProtocol::parse(&raw.protocol, raw.dev_addr)?;
            if raw.usb_interface > MAX_USB_INTERFACE {
                return Err(ConfigError::InvalidValue(format!(
                    "usb_interface {} in CPLD profile {} (0 to {})",
                    raw.usb_interface, name, MAX_USB_INTERFACE
                )));
            }
            let mut commands = BTreeMap::new();
            for (cmd, c) in raw.commands {
                if cmd == REVISION_COMMAND {
                    match &c.expected {
                        None => {
                            return Err(ConfigError::MissingValue(format!(
                                "`expected` for revision in CPLD profile {}",
                                name
                            )))
                        }
                        Some(expected) if expected.is_empty() => {
                            return Err(ConfigError::InvalidValue(format!(
                                "empty `expected` for revision in CPLD profile {}",
                                name
                            )))
                        }
                        Some(_) => {}
                    }
                }
                commands.insert(
                    cmd,
                    RegisterCommand {
                        addr: c.addr,
                        data: c.data,
                        expected: c.expected,
                    },
                );
            }
            cpld_profiles.insert(
                name.clone(),
                CpldProfile {
                    name,
                    protocol,
                    usb_vid: raw.usb_vid,
                    usb_pid: raw.usb_pid,
                    usb_interface: raw.usb_interface,
                    commands,
                },
            );
        }

        let mut boards = BTreeMap::new();
        for (name, raw) in self.board {
            if let Some(profile) = &raw.cpld_profile {
                if !cpld_profiles.contains_key(profile) {
                    return Err(ConfigError::UnknownCpldProfile {
                        board: name,
                        profile: profile.clone(),
                    });
                }
            }

            let mut ipls = Vec::with_capacity(raw.ipls.len());
            for (key, value) in raw.ipls {
                let ipl_name = key
                    .as_str()
                    .ok_or_else(|| {
                        ConfigError::InvalidValue(format!("loader name {:?} on board {}", key, name))
                    })?
                    .to_string();
                let ipl: RawIpl = serde_yaml::from_value(value).map_err(|e| {
                    ConfigError::Parse(format!("loader {} on board {}: {}", ipl_name, name, e))
                })?;
                if !flash_targets.contains_key(&ipl.flash_target) {
                    return Err(ConfigError::UnknownFlashTarget {
                        loader: ipl_name,
                        target: ipl.flash_target,
                    });
                }
                ipls.push(IplEntry {
                    name: ipl_name,
                    file: ipl.file,
                    flash_addr: ipl.flash_addr,
                    flash_target: ipl.flash_target,
                });
            }

            boards.insert(
                name.clone(),
                BoardProfile {
                    name,
                    flash_writer: raw.flash_writer,
                    baud: raw.baud.unwrap_or(DEFAULT_BAUD),
                    sup_baud: raw.sup_baud,
                    cpld_profile: raw.cpld_profile,
                    ipls,
                },
            );
        }

        Ok(Config {
            boards,
            flash_targets,
            cpld_profiles,
        })
    }
}
