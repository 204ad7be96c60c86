//! Device authorization grant (RFC 8628) against a GitHub-style provider.

use std::io::Write;
use std::time::Duration;

use serde::Deserialize;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::http::Transport;

use super::{AccessToken, AuthError};

/// `grant_type` value for device code token polling.
pub const GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Session returned by the device code endpoint.
///
/// Lives only for the duration of one polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceAuthSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds until `device_code` expires.
    pub expires_in: u64,
    /// Minimum seconds between token polls.
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// What a single token poll told us.
enum Poll {
    Granted(AccessToken),
    Pending,
    SlowDown,
}

/// OAuth2 device authorization flow.
///
/// ```text
/// Requesting -> Polling { pending | slow_down }* -> Succeeded | Denied | Errored | Expired
/// ```
///
/// All outcomes other than pending are terminal; retrying the whole flow is
/// up to the caller.
pub struct DeviceAuthFlow<'a> {
    transport: &'a dyn Transport,
    clock: &'a dyn Clock,
    auth_base: String,
    client_id: String,
    scope: String,
}

impl<'a> DeviceAuthFlow<'a> {
    /// Flow against github.com requesting the `repo` scope.
    pub fn new(transport: &'a dyn Transport, client_id: impl Into<String>) -> Self {
        Self {
            transport,
            clock: &SystemClock,
            auth_base: "https://github.com".to_string(),
            client_id: client_id.into(),
            scope: "repo".to_string(),
        }
    }

    /// Flow using the provider, client id and scope from `config`.
    pub fn from_config(transport: &'a dyn Transport, config: &Config) -> Self {
        Self::new(transport, config.client_id.clone())
            .with_auth_base(&config.auth_base)
            .with_scope(&config.scope)
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_auth_base(mut self, auth_base: &str) -> Self {
        self.auth_base = auth_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    fn device_code_url(&self) -> String {
        format!("{}/login/device/code", self.auth_base)
    }

    fn token_url(&self) -> String {
        format!("{}/login/oauth/access_token", self.auth_base)
    }

    /// Run the whole flow.
    ///
    /// The verification URI and user code are written to `prompt`. On success
    /// the token is attached to the transport before it is returned. Every
    /// failure is logged here as well as returned.
    pub fn authenticate(&self, prompt: &mut dyn Write) -> Result<AccessToken, AuthError> {
        let session = self.request_session().inspect_err(|e| {
            tracing::error!("Authentication failed at stage 1: {}", e);
        })?;
        let Some(deadline) = self
            .clock
            .now()
            .checked_add(Duration::from_secs(session.expires_in))
        else {
            tracing::error!(
                expires_in = session.expires_in,
                "Authentication failed: device code lifetime is out of range"
            );
            return Err(AuthError::Expired);
        };

        if let Err(e) = present(prompt, &session) {
            tracing::warn!("failed to display the user code: {}", e);
        }

        let interval = Duration::from_secs(session.interval.max(1));
        while self.clock.now() < deadline {
            match self.poll(&session) {
                Ok(Poll::Granted(token)) => {
                    self.transport.authorize(&token);
                    tracing::info!(scope = %token.scope, "Authentication succeeded");
                    return Ok(token);
                }
                Ok(Poll::Pending) => {}
                // The provider wants a larger interval; pay one extra interval
                // for this response only.
                Ok(Poll::SlowDown) => self.clock.sleep(interval),
                Err(AuthError::Denied) => {
                    tracing::info!("Authentication failed: user denied authentication");
                    return Err(AuthError::Denied);
                }
                Err(e) => {
                    tracing::error!("Authentication failed: {}", e);
                    return Err(e);
                }
            }

            self.clock.sleep(interval);
        }

        tracing::error!("Authentication failed: took too long");
        Err(AuthError::Expired)
    }

    fn request_session(&self) -> Result<DeviceAuthSession, AuthError> {
        let url = self.device_code_url();
        let response = self
            .transport
            .post_form(
                &url,
                &[
                    ("client_id", self.client_id.as_str()),
                    ("scope", self.scope.as_str()),
                ],
            )?
            .error_for_status(&url)?;

        response.json().map_err(|e| AuthError::Malformed {
            stage: "device code",
            message: format!("{} (body: {})", e, response.text()),
        })
    }

    fn poll(&self, session: &DeviceAuthSession) -> Result<Poll, AuthError> {
        let response = self.transport.post_form(
            &self.token_url(),
            &[
                ("client_id", self.client_id.as_str()),
                ("device_code", session.device_code.as_str()),
                ("grant_type", GRANT_TYPE_DEVICE_CODE),
            ],
        )?;

        let malformed = |message: String| AuthError::Malformed {
            stage: "token",
            message,
        };
        let body: serde_json::Value = response.json().map_err(|e| malformed(e.to_string()))?;

        let Some(error) = body.get("error") else {
            let token = serde_json::from_value(body).map_err(|e| malformed(e.to_string()))?;
            return Ok(Poll::Granted(token));
        };

        match error.as_str().unwrap_or_default() {
            "authorization_pending" => Ok(Poll::Pending),
            "slow_down" => Ok(Poll::SlowDown),
            "access_denied" => Err(AuthError::Denied),
            other => Err(AuthError::Provider(other.to_string())),
        }
    }
}

/// Show the operator where to go and what to type.
fn present(out: &mut dyn Write, session: &DeviceAuthSession) -> std::io::Result<()> {
    let width = session.user_code.chars().count().max(9);
    let border = format!("+{}+", "-".repeat(width));
    writeln!(
        out,
        "[AUTH REQUIRED] This application needs authorization. Go to {} and enter the following code:",
        session.verification_uri
    )?;
    writeln!(out, "{border}")?;
    writeln!(out, "|{:^width$}|", session.user_code)?;
    writeln!(out, "{border}")?;
    out.flush()
}
