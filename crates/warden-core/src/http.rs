//! HTTP transport used by device authorization and the release installer.
//!
//! The core talks to the network only through [`Transport`], so tests can
//! script responses. [`HttpClient`] is the production implementation on top
//! of a blocking `reqwest` client.

use std::io::Read;
use std::sync::{PoisonError, RwLock};

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::auth::AccessToken;

/// Media type for JSON API requests.
pub const ACCEPT_JSON: &str = "application/json";

/// Media type for raw release asset downloads.
pub const ACCEPT_OCTET_STREAM: &str = "application/octet-stream";

/// Errors produced by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the body could not be read.
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Turn a non-2xx response from `url` into [`TransportError::Status`].
    pub fn error_for_status(self, url: &str) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Status {
                url: url.to_string(),
                status: self.status,
            })
        }
    }
}

/// Blocking HTTP operations needed by the core.
pub trait Transport: Send + Sync {
    /// GET `url` with the given `Accept` header.
    fn get(&self, url: &str, accept: &str) -> Result<Response, TransportError>;

    /// POST a URL-encoded form to `url`, asking for a JSON answer.
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Response, TransportError>;

    /// Attach `token` to every later request.
    fn authorize(&self, token: &AccessToken);
}

/// [`Transport`] backed by `reqwest::blocking`.
pub struct HttpClient {
    client: reqwest::blocking::Client,
    authorization: RwLock<Option<HeaderValue>>,
}

impl HttpClient {
    /// Build a client, optionally pre-authorized with a cached token.
    pub fn new(token: Option<&AccessToken>) -> Result<Self, TransportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));

        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        let http = Self {
            client,
            authorization: RwLock::new(None),
        };
        if let Some(token) = token {
            http.authorize(token);
        }
        Ok(http)
    }

    fn send(
        &self,
        url: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<Response, TransportError> {
        let request_err = |e: &dyn std::fmt::Display| TransportError::Request {
            url: url.to_string(),
            message: e.to_string(),
        };

        let request = match self
            .authorization
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        };

        let mut response = request.send().map_err(|e| request_err(&e))?;
        let status = response.status().as_u16();

        // Size the buffer from the advertised length; payloads are held in memory
        // until their signature has been checked.
        let capacity = response
            .content_length()
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0);
        let mut body = Vec::with_capacity(capacity);
        response
            .read_to_end(&mut body)
            .map_err(|e| request_err(&e))?;

        tracing::debug!(url, status, bytes = body.len(), "http response");
        Ok(Response { status, body })
    }
}

impl Transport for HttpClient {
    fn get(&self, url: &str, accept: &str) -> Result<Response, TransportError> {
        self.send(url, self.client.get(url).header(ACCEPT, accept))
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Response, TransportError> {
        self.send(
            url,
            self.client.post(url).header(ACCEPT, ACCEPT_JSON).form(form),
        )
    }

    fn authorize(&self, token: &AccessToken) {
        match HeaderValue::from_str(&token.authorization_value()) {
            Ok(mut value) => {
                value.set_sensitive(true);
                *self
                    .authorization
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(value);
            }
            Err(e) => tracing::error!("access token is not a valid header value: {}", e),
        }
    }
}
