//! Supervisor configuration.
//!
//! The configuration is a plain value loaded once at startup and handed to
//! each component. It is persisted as pretty-printed JSON; the cached access
//! token is written back after a successful device authorization.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AccessToken;
use crate::release::{HashAlgorithm, SignaturePadding};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/warden.json";

/// Repository id shipped in a fresh configuration file.
pub const PLACEHOLDER_REPO: &str = "owner/repo";

/// Errors raised while handling the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("repository id is still the placeholder `owner/repo` (edit {path})")]
    PlaceholderRepo { path: PathBuf },

    #[error("invalid repository id `{0}`")]
    InvalidRepo(String),
}

/// Supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hosted module executable.
    pub module_path: PathBuf,
    /// Release feed repository, shaped `owner/name`.
    pub repo_id: String,
    /// OAuth application client id.
    pub client_id: String,
    pub signature_hash: HashAlgorithm,
    pub signature_padding: SignaturePadding,
    /// PEM encoded RSA public key used to verify release payloads.
    pub public_key_path: PathBuf,
    /// Directory release archives are extracted over.
    pub install_dir: PathBuf,
    /// Directory downloaded archives are staged in.
    pub staging_dir: PathBuf,
    /// Base URL of the release feed API.
    pub api_base: String,
    /// Base URL of the OAuth provider.
    pub auth_base: String,
    /// Scope requested during device authorization.
    pub scope: String,
    /// Token cached from a previous device authorization.
    pub current_auth: Option<AccessToken>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            module_path: PathBuf::from(if cfg!(windows) {
                "program.exe"
            } else {
                "program"
            }),
            repo_id: PLACEHOLDER_REPO.to_string(),
            client_id: "xxxxxxxxxxxxxxxx".to_string(),
            signature_hash: HashAlgorithm::Sha512,
            signature_padding: SignaturePadding::Pkcs1,
            public_key_path: PathBuf::from("res/public.pem"),
            install_dir: PathBuf::from("."),
            staging_dir: PathBuf::from("updates"),
            api_base: "https://api.github.com".to_string(),
            auth_base: "https://github.com".to_string(),
            scope: "repo".to_string(),
            current_auth: None,
        }
    }
}

impl Config {
    /// Load the configuration, writing a default file first if none exists.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            return Ok(config);
        }
        Self::load(path)
    }

    /// Load the configuration from an existing file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Persist the configuration, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(write_err)
    }

    /// Check the invariants that must hold before update checks run.
    ///
    /// `path` is only used to point the operator at the file to edit.
    pub fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.repo_id == PLACEHOLDER_REPO {
            return Err(ConfigError::PlaceholderRepo {
                path: path.to_path_buf(),
            });
        }
        match self.repo_id.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(())
            }
            _ => Err(ConfigError::InvalidRepo(self.repo_id.clone())),
        }
    }

    /// URL of the latest release resource of the configured repository.
    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            self.repo_id
        )
    }
}
