//! Core engine for the Warden self-updating process supervisor.
//!
//! This crate provides:
//! - OAuth2 device authorization for the release feed
//! - Release discovery, signature verification and installation
//! - Hosting a module executable in an isolated child process
//! - The supervisor loop that restarts and updates the module

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod release;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use auth::{AccessToken, AuthError, DeviceAuthFlow};
pub use clock::{Clock, SystemClock};
pub use config::{Config, ConfigError, DEFAULT_CONFIG_PATH};
pub use error::{Error, Result};
pub use host::{LoadError, ModuleHandle, ModuleHost, RuntimeError};
pub use http::{HttpClient, Response, Transport, TransportError};
pub use release::{
    HashAlgorithm, InstallError, InstallOutcome, IntegrityError, ReleaseInstaller,
    SignaturePadding, VersionTuple,
};
pub use supervisor::{ModuleState, Supervisor, SupervisorError};
