//! Configuration system for the harness.
//!
//! This module defines all configuration structures and enums used to parameterize
//! a run. It provides:
//! 1. **Defaults:** Baseline constants (flash window, pin count, pacing, loader policy).
//! 2. **Structures:** Hierarchical config for the device, the image loader and the session.
//! 3. **Enums:** Execution mode and device diagnostic verbosity.
//!
//! Configuration is supplied as JSON (`Config::from_json` / `Config::from_file`); every
//! field is optional and falls back to the defaults below. The CLI overrides individual
//! fields from flags.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::ConfigError;
use crate::soc::traits::LogLevel;

/// Default configuration constants for the harness.
mod defaults {
    /// Base address of the program flash window (RP2040-style XIP base).
    ///
    /// Firmware images are written here and the program counter starts here.
    pub const FLASH_BASE: u32 = 0x1000_0000;

    /// Size of the program flash window (2 MiB).
    pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

    /// Number of GPIO pins exposed by the device.
    pub const PIN_COUNT: usize = 30;

    /// Offset added to every address decoded from a hex image.
    ///
    /// Zero because compilers emit absolute addresses via extended-address records.
    pub const BASE_OFFSET: u32 = 0;

    /// Record checksums are checked unless a config turns verification off.
    pub const VERIFY_CHECKSUMS: bool = true;

    /// Device ticks executed per `poll` in cooperative mode.
    pub const SLICE_TICKS: u32 = 1_000;

    /// Device clock used to pace the threaded execution context (ticks per second).
    pub const CLOCK_HZ: u64 = 1_000;
}

/// How the device's execution cycle is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ExecutionMode {
    /// The device runs on a dedicated OS thread until stopped.
    #[default]
    Threaded,
    /// The device is ticked in fixed slices from the caller's `poll`.
    ///
    /// Required where threads are unavailable (`wasm32-unknown-unknown`).
    Cooperative,
}

/// Root configuration structure.
///
/// # Examples
///
/// ```
/// use blinksim_core::config::{Config, ExecutionMode};
///
/// let config = Config::from_json(r#"{
///     "device": { "pin_count": 8 },
///     "loader": { "atomic": true },
///     "session": { "execution": "Cooperative", "slice_ticks": 50 }
/// }"#).unwrap();
/// assert_eq!(config.device.pin_count, 8);
/// assert_eq!(config.device.flash_base, 0x1000_0000);
/// assert!(config.loader.atomic);
/// assert_eq!(config.session.execution, ExecutionMode::Cooperative);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Emulated device shape
    #[serde(default)]
    pub device: DeviceConfig,
    /// Hex image loading policy
    #[serde(default)]
    pub loader: LoaderConfig,
    /// Execution and diagnostics of a session
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the text is not valid JSON or has mistyped fields.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }
}

/// Shape of the emulated device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Base address of the program flash window
    #[serde(default = "DeviceConfig::default_flash_base")]
    pub flash_base: u32,

    /// Size of the program flash window in bytes
    #[serde(default = "DeviceConfig::default_flash_size")]
    pub flash_size: usize,

    /// Number of GPIO pins
    #[serde(default = "DeviceConfig::default_pin_count")]
    pub pin_count: usize,

    /// Optional raw boot ROM image; the device's built-in ROM is used when absent
    #[serde(default)]
    pub bootrom: Option<PathBuf>,
}

impl DeviceConfig {
    fn default_flash_base() -> u32 {
        defaults::FLASH_BASE
    }

    fn default_flash_size() -> usize {
        defaults::FLASH_SIZE
    }

    fn default_pin_count() -> usize {
        defaults::PIN_COUNT
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            flash_base: defaults::FLASH_BASE,
            flash_size: defaults::FLASH_SIZE,
            pin_count: defaults::PIN_COUNT,
            bootrom: None,
        }
    }
}

/// Hex image loading policy.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Offset added to every decoded record address
    #[serde(default = "LoaderConfig::default_base_offset")]
    pub base_offset: u32,

    /// Reject records whose checksum does not verify
    #[serde(default = "LoaderConfig::default_verify_checksums")]
    pub verify_checksums: bool,

    /// Validate the whole image before writing any byte (all-or-nothing)
    #[serde(default)]
    pub atomic: bool,
}

impl LoaderConfig {
    fn default_base_offset() -> u32 {
        defaults::BASE_OFFSET
    }

    fn default_verify_checksums() -> bool {
        defaults::VERIFY_CHECKSUMS
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_offset: defaults::BASE_OFFSET,
            verify_checksums: defaults::VERIFY_CHECKSUMS,
            atomic: false,
        }
    }
}

/// Execution and diagnostics settings for a device session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Where the execution cycle runs
    #[serde(default)]
    pub execution: ExecutionMode,

    /// Ticks per `poll` in cooperative mode
    #[serde(default = "SessionConfig::default_slice_ticks")]
    pub slice_ticks: u32,

    /// Threaded pacing in ticks per second; 0 runs unthrottled
    #[serde(default = "SessionConfig::default_clock_hz")]
    pub clock_hz: u64,

    /// Most verbose device diagnostic that reaches the log
    #[serde(default)]
    pub device_log_level: LogLevel,
}

impl SessionConfig {
    fn default_slice_ticks() -> u32 {
        defaults::SLICE_TICKS
    }

    fn default_clock_hz() -> u64 {
        defaults::CLOCK_HZ
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionMode::default(),
            slice_ticks: defaults::SLICE_TICKS,
            clock_hz: defaults::CLOCK_HZ,
            device_log_level: LogLevel::default(),
        }
    }
}
