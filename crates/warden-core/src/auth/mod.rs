//! OAuth2 device authorization.
//!
//! Obtains an access token for the release feed by having the operator
//! approve a short user code in a browser while this process polls the
//! provider.

mod device;

pub use device::{DeviceAuthFlow, DeviceAuthSession, GRANT_TYPE_DEVICE_CODE};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::TransportError;

/// Token returned by the provider on successful authorization.
///
/// Never refreshed; it is cached in the configuration and attached to every
/// request for the lifetime of the process.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
}

impl AccessToken {
    /// Value of the `Authorization` header for this token.
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Terminal outcomes of a failed authorization attempt.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed {stage} response: {message}")]
    Malformed {
        stage: &'static str,
        message: String,
    },

    #[error("user denied authentication")]
    Denied,

    #[error("provider returned `{0}`")]
    Provider(String),

    #[error("device code expired before the request was approved")]
    Expired,
}
