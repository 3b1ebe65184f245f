//! Emulated device side of the harness.
//!
//! This module holds the device contract and everything a device is built from:
//! the GPIO bank with its listeners, the flash and boot ROM regions, and the
//! reference `ToyMcu` used by the CLI and the tests.

/// GPIO pins, levels and transition listeners.
pub mod gpio;

/// Program flash and boot ROM regions.
pub mod memory;

/// Reference byte-coded GPIO sequencer device.
pub mod toy;

/// Device, memory sink and factory traits.
pub mod traits;

pub use gpio::{GpioBank, ListenerId, PinLevel};
pub use memory::{BootRom, Flash};
pub use toy::ToyMcu;
pub use traits::{Device, DeviceFactory, LogLevel, MemorySink};
