//! Common types shared by the loader, registry, session and controller.
//!
//! Currently this is the error taxonomy; every fallible operation in the crate
//! returns one of the types re-exported here.

/// Error types for loading, binding, lifecycle, execution and compilation.
pub mod error;

pub use error::{CompileError, ConfigError, DeviceError, LoadError, SessionError, StateError};
