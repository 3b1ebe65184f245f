//! Seams between the harness and the emulated device.
//!
//! This module defines the contracts the harness consumes. It provides:
//! 1. **Memory:** `MemorySink`, a byte-addressable target the image loader writes into.
//! 2. **Device:** `Device`, the executable emulator (flash, boot ROM, GPIO, PC, tick).
//! 3. **Construction:** `DeviceFactory`, so each session allocates a fresh instance.
//! 4. **Diagnostics:** `LogLevel`, the verbosity filter applied to device output.
//!
//! Devices must be `Send`: in threaded mode the instance moves onto the execution thread.

use std::fmt;

use serde::Deserialize;

use crate::common::DeviceError;
use crate::soc::gpio::GpioBank;

/// Byte-addressable memory the loader can write into.
///
/// Addresses are absolute 32-bit device addresses. Writes that fall outside the
/// region are dropped, like stores past the end of a typed array.
pub trait MemorySink {
    /// Writes one byte at `addr`.
    fn write_u8(&mut self, addr: u32, val: u8);

    /// Reads one byte at `addr`, or `None` if the region does not decode it.
    fn read_u8(&self, addr: u32) -> Option<u8>;

    /// Writes a contiguous byte slice starting at `addr`, wrapping at 32 bits.
    fn write_bytes(&mut self, addr: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.write_u8(addr.wrapping_add(i as u32), *byte);
        }
    }
}

/// Verbosity of the device's own diagnostic output.
///
/// Ordered from least to most verbose; a message is emitted when its level is
/// less than or equal to the configured one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum LogLevel {
    /// Faults only.
    #[default]
    Error,
    /// Suspicious but recoverable conditions.
    Warn,
    /// Lifecycle milestones.
    Info,
    /// Per-instruction and per-pin detail.
    Debug,
}

impl LogLevel {
    /// Returns `true` if a message at `message` level passes this filter.
    pub fn allows(self, message: Self) -> bool {
        message <= self
    }
}

/// An executable emulated microcontroller.
///
/// The harness never looks inside the CPU: it writes flash, installs a boot ROM,
/// subscribes to GPIO transitions, sets the PC and calls [`tick`](Device::tick) in a
/// loop. That loop is the device's continuous execution cycle.
pub trait Device: Send {
    /// Returns a short name for this device (e.g., `"toy-mcu"`).
    fn name(&self) -> &str;

    /// Returns the program flash region.
    fn flash(&mut self) -> &mut dyn MemorySink;

    /// Returns the address where program flash is mapped.
    fn flash_base(&self) -> u32;

    /// Installs a read-only boot program region.
    fn load_bootrom(&mut self, image: &[u8]);

    /// Sets the most verbose device diagnostic that is emitted.
    fn set_log_level(&mut self, level: LogLevel);

    /// Returns the GPIO bank.
    fn gpio(&mut self) -> &mut GpioBank;

    /// Returns the number of GPIO pins.
    fn pin_count(&self) -> usize;

    /// Returns the program counter.
    fn pc(&self) -> u32;

    /// Sets the program counter.
    fn set_pc(&mut self, pc: u32);

    /// Executes one step of the fetch-execute cycle.
    ///
    /// # Errors
    ///
    /// Returns a `DeviceError` when the device faults; the cycle must not continue.
    fn tick(&mut self) -> Result<(), DeviceError>;

    /// Returns `true` once the program has halted and further ticks do nothing.
    fn is_halted(&self) -> bool {
        false
    }
}

impl fmt::Debug for dyn Device + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name())
            .field("pc", &format_args!("{:#010x}", self.pc()))
            .finish_non_exhaustive()
    }
}

/// Allocates fresh device instances, one per session.
pub trait DeviceFactory {
    /// Creates a new, powered-on device with empty flash.
    fn create(&self) -> Box<dyn Device>;
}

impl<F> DeviceFactory for F
where
    F: Fn() -> Box<dyn Device>,
{
    fn create(&self) -> Box<dyn Device> {
        self()
    }
}
