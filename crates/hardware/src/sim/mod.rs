//! Execution-and-observation harness.
//!
//! Loads firmware images into a device, runs it, and mirrors its GPIO pins onto
//! indicators. Components, leaves first:
//! 1. **Loader:** Intel HEX text into device memory.
//! 2. **Registry:** GPIO listeners feeding indicators through a pin-event queue.
//! 3. **Session:** One device's lifecycle (`Idle -> Loaded -> Running -> Stopped`).
//! 4. **Controller:** Compile, launch, stop and poll on behalf of the user.

pub mod controller;
pub mod loader;
pub mod registry;
pub mod session;

pub use controller::{
    CompileOutput, CompileResult, Compiler, ControlPanel, Panel, RunController, RunOutcome,
    RunTicket,
};
pub use loader::{LoadSummary, MemoryImage, load_hex};
pub use registry::{Indicator, Led, PinBinding, PinBindings, PinEvent, PinSpec, bind};
pub use session::{DeviceSession, ExecutionEnd, PollReport, SessionId, SessionState};
