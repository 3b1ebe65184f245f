


/// Session state machine and execution.
pub mod session;
