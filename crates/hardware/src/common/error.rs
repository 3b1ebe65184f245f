//! Harness error taxonomy.
//!
//! This module defines every error the harness can report. It provides:
//! 1. **Image errors:** `LoadError` for Intel HEX text that violates the record format.
//! 2. **Configuration errors:** `ConfigError` for indicator pin labels and config files.
//! 3. **Lifecycle errors:** `StateError` for out-of-order session operations.
//! 4. **Execution errors:** `DeviceError` raised by the emulated device while running.
//! 5. **Compile errors:** `CompileError` for a failed request to the compiler service.
//!
//! `SessionError` is the umbrella returned by `DeviceSession` operations; the run
//! controller is the only place that turns any of these into user-visible text.

use thiserror::Error;

use crate::sim::session::SessionState;

/// The image text violates the Intel HEX format.
///
/// Line numbers are 1-based and count every line of the input, blank ones included.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// A record is structurally invalid (bad mark, digits, length or checksum).
    #[error("line {line}: malformed record: {reason}")]
    Malformed {
        /// Line of the offending record.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// The record type field is outside the recognised `00`..=`05` set.
    #[error("line {line}: unknown record type {record_type:#04x}")]
    UnknownRecordType {
        /// Line of the offending record.
        line: usize,
        /// The record type byte as declared.
        record_type: u8,
    },
}

impl LoadError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line,
            reason: reason.into(),
        }
    }
}

/// Harness configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An indicator's pin label is missing or is not a non-negative integer.
    #[error("invalid pin label {label:?}")]
    InvalidPinLabel {
        /// The label text as read from the indicator (empty when absent).
        label: String,
    },

    /// The pin label parsed but names a pin the device does not have.
    #[error("pin {pin} is out of range (device has {pin_count} pins)")]
    PinOutOfRange {
        /// Parsed pin index.
        pin: usize,
        /// Number of GPIO pins on the device.
        pin_count: usize,
    },

    /// A configuration document could not be read or deserialized.
    #[error("configuration: {0}")]
    Parse(String),
}

/// A session operation was called in a state that does not permit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    /// `start` was called on a session that is already running.
    #[error("session is already running")]
    AlreadyRunning,

    /// The requested operation is not a legal transition from the current state.
    #[error("cannot {operation} a session in state {from}")]
    InvalidTransition {
        /// State the session was in.
        from: SessionState,
        /// Name of the rejected operation.
        operation: &'static str,
    },
}

/// The emulated device stopped executing because of a fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The fetched opcode has no meaning on this device.
    #[error("illegal instruction {opcode:#04x} at pc {pc:#010x}")]
    IllegalInstruction {
        /// Address of the opcode.
        pc: u32,
        /// The opcode byte.
        opcode: u8,
    },

    /// An access hit an address no memory region decodes.
    #[error("bus fault at {addr:#010x}")]
    BusFault {
        /// Faulting address.
        addr: u32,
    },

    /// The execution thread could not be created; the device instance is lost.
    #[error("could not start execution context: {0}")]
    SpawnFailed(String),

    /// The execution thread panicked; the device instance is lost.
    #[error("execution context panicked")]
    ExecutionPanicked,
}

/// The compiler service could not produce a response.
///
/// A response that reports a failed compilation is not an error; see
/// [`CompileResult::Failure`](crate::sim::controller::CompileResult::Failure).
#[derive(Debug, Error)]
pub enum CompileError {
    /// Spawning or talking to the toolchain failed at the OS level.
    #[error("compiler i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The service was reachable but the exchange failed (network, timeout, status).
    #[error("compiler service: {0}")]
    Transport(String),

    /// The service answered with something that is not a compile response.
    #[error("bad compiler response: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// Any failure of a `DeviceSession` operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Image load failed.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Observer binding failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Operation called out of order.
    #[error(transparent)]
    State(#[from] StateError),
    /// Device faulted during execution.
    #[error(transparent)]
    Device(#[from] DeviceError),
}
