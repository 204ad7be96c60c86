//! Warden: SDK for modules hosted by the Warden supervisor.
//!
//! A hosted module is an ordinary executable whose `main` is generated by
//! [`hosted_main!`]. The supervisor starts it as a child process, talks to it
//! over the process's original stdout and stdin, and restarts or replaces it
//! as releases come in.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use warden::{HostedModule, UpdateNotifier};
//!
//! struct Bot {
//!     notifier: UpdateNotifier,
//! }
//!
//! impl HostedModule for Bot {
//!     fn run(&self, args: Vec<String>) -> i32 {
//!         // ... do the work, return the exit code
//!         0
//!     }
//!
//!     fn handle_command(&self, command: &str) {
//!         if command == "upgrade" {
//!             self.notifier.request_update();
//!         }
//!     }
//!
//!     fn stop(&self) {
//!         // make `run` return soon
//!     }
//! }
//!
//! warden::hosted_main!(|notifier| Bot { notifier });
//! ```
//!
//! Stdout is reserved for the supervisor channel. On Unix anything the module
//! prints with `println!` goes to stderr instead; on other platforms a module
//! must not write to stdout at all.

mod serve;

pub use serve::{UpdateNotifier, serve, serve_io};
pub use warden_core::host::protocol::{
    ENTRY_COMMAND, ENTRY_NOTIFIER, ENTRY_RUN, ENTRY_STOP, REQUIRED_ENTRIES,
};

/// The capabilities a hosted module provides.
///
/// `handle_command` and `stop` are called from the channel thread while
/// `run` executes on its own thread.
pub trait HostedModule: Send + Sync + 'static {
    /// Main entry point. The return value is the module's exit code; `0`
    /// means it finished normally and should not be restarted.
    fn run(&self, args: Vec<String>) -> i32;

    /// An operator command line the supervisor did not handle itself.
    fn handle_command(&self, command: &str);

    /// Make `run` return as soon as possible.
    fn stop(&self);

    /// Entry points declared in the handshake.
    fn entries(&self) -> Vec<&'static str> {
        REQUIRED_ENTRIES.to_vec()
    }
}

/// Generate `main` for a hosted module and embed its version marker.
///
/// Takes a constructor `FnOnce(UpdateNotifier) -> impl HostedModule`. The
/// version defaults to the package version; pass `version = "x.y.z"` to
/// override it.
#[macro_export]
macro_rules! hosted_main {
    (version = $version:literal, $make:expr) => {
        #[used]
        static WARDEN_VERSION_MARKER: &[u8] =
            concat!("warden-module-version=", $version, "\0").as_bytes();

        fn main() {
            ::std::process::exit($crate::serve($version, $make));
        }
    };
    ($make:expr) => {
        #[used]
        static WARDEN_VERSION_MARKER: &[u8] =
            concat!("warden-module-version=", env!("CARGO_PKG_VERSION"), "\0").as_bytes();

        fn main() {
            ::std::process::exit($crate::serve(env!("CARGO_PKG_VERSION"), $make));
        }
    };
}
