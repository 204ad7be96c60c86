//! Error types for warden-core.

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::http::TransportError;
use crate::release::{InstallError, IntegrityError, SignError};
use crate::supervisor::SupervisorError;

/// Result type for warden-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in warden-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded, saved or validated.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP request failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Device authorization did not produce a token.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Signature or key problem.
    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    /// Unrecoverable installation failure.
    #[error("install failed: {0}")]
    Install(#[from] InstallError),

    /// Release could not be signed.
    #[error("signing failed: {0}")]
    Sign(#[from] SignError),

    /// Supervisor could not start its threads or has been shut down.
    #[error("supervisor error: {0}")]
    Supervisor(SupervisorError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SupervisorError> for Error {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::Install(e) => Error::Install(e),
            other => Error::Supervisor(other),
        }
    }
}

impl Error {
    /// Render the error followed by a recovery hint for the operator, if one applies.
    pub fn with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }

    /// Operator-facing recovery hint.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::Config(ConfigError::PlaceholderRepo { .. }) => {
                Some("set `repo_id` to the `owner/name` of your release repository")
            }
            Error::Config(ConfigError::InvalidRepo(_)) => {
                Some("`repo_id` must look like `owner/name`")
            }
            Error::Auth(AuthError::Denied) => {
                Some("restart warden and approve the request in the browser")
            }
            Error::Auth(AuthError::Expired) => {
                Some("the device code expired, restart warden and enter the code sooner")
            }
            Error::Integrity(IntegrityError::Key { .. }) => {
                Some("check `public_key_path`; the key must be a PEM encoded RSA public key")
            }
            Error::Install(InstallError::Extract { .. }) => Some(
                "the installation may be incomplete; fix the file permissions and restart warden",
            ),
            Error::Sign(SignError::Missing(_)) => {
                Some("sign mode needs secret.pem, sign/binaries.zip and sign/version.txt")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_startup_install_failure_keeps_extract_hint() {
        let err = Error::from(SupervisorError::Install(InstallError::Extract {
            path: PathBuf::from("install/program"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        }));
        assert!(matches!(err, Error::Install(InstallError::Extract { .. })));
        assert!(err.with_hint().contains("hint: the installation may be incomplete"));
    }

    #[test]
    fn test_supervisor_errors_without_hint() {
        let err = Error::from(SupervisorError::ShutDown);
        assert!(matches!(err, Error::Supervisor(SupervisorError::ShutDown)));
        assert_eq!(err.with_hint(), "supervisor error: supervisor has been shut down");
    }

    #[test]
    fn test_placeholder_repo_hint() {
        let err = Error::from(ConfigError::PlaceholderRepo {
            path: PathBuf::from("warden.json"),
        });
        assert!(err.with_hint().contains("set `repo_id`"));
    }
}
