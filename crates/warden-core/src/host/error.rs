use std::path::PathBuf;

use thiserror::Error;

use super::protocol::IpcError;

/// Why a module could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module executable {0} does not exist")]
    NotFound(PathBuf),

    #[error("failed to start {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not a hosted module: {reason}")]
    NotAModule { path: PathBuf, reason: String },

    #[error("module speaks protocol {found}, expected {expected}")]
    ProtocolMismatch { expected: u32, found: u32 },

    #[error("module has no update notifier constructor (`notifier`)")]
    MissingConstructor,

    #[error("module has no main entry point (`run`)")]
    MissingMain,

    #[error("module has no command handler (`command`)")]
    MissingCommandHandler,

    #[error("module has no stop handler (`stop`)")]
    MissingStopHandler,
}

/// Failures while a loaded module runs.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("module panicked: {0}")]
    Panicked(String),

    #[error("module process died ({status})")]
    ProcessDied { status: String },

    #[error(transparent)]
    Ipc(#[from] IpcError),
}
