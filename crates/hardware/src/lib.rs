//! Microcontroller firmware harness library.
//!
//! This crate runs compiled firmware on an emulated device and mirrors the device's
//! output pins onto indicators. It provides:
//! 1. **Loader:** Intel HEX parsing into device flash (streaming or all-or-nothing).
//! 2. **Registry:** Pin-to-indicator bindings fed through a single-consumer event queue.
//! 3. **Session:** A one-shot device lifecycle with threaded or cooperative execution.
//! 4. **Controller:** The run/stop workflow around an external compiler service.
//! 5. **SoC:** The device contract, GPIO bank, memory regions and a reference device.

/// Error taxonomy shared by every component.
pub mod common;
/// Harness configuration (defaults, JSON loading, execution mode).
pub mod config;
/// Loader, registry, session and controller.
pub mod sim;
/// Device contract and the reference device.
pub mod soc;

/// Root configuration type; use `Config::default()` or `Config::from_json`.
pub use crate::config::Config;
/// One device lifecycle.
pub use crate::sim::DeviceSession;
/// User-facing run/stop workflow.
pub use crate::sim::RunController;
/// The emulated device contract.
pub use crate::soc::Device;
