//! Hosting a module in an isolated child process.
//!
//! A module is a separate executable built with the `warden` SDK. The host
//! starts it, checks its handshake for the required entry points, then drives
//! it over a framed channel on the child's stdin/stdout. Unloading a module
//! means its process has exited.

mod error;
mod module;
pub mod protocol;

pub use error::{LoadError, RuntimeError};
pub use module::{ModuleHandle, ModuleHost, UpdateHook, check_entries};
pub use protocol::{IpcError, PROTOCOL_VERSION, REQUIRED_ENTRIES};
