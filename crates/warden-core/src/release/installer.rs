//! Fetch, verify and install the latest release.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;
use crate::http::{ACCEPT_JSON, ACCEPT_OCTET_STREAM, Transport};

use super::extract::{ExtractReport, extract_archive};
use super::feed::{BINARIES_ASSET, Release, ReleaseAssets, SIGNATURE_ASSET, VERSION_ASSET};
use super::signature::{IntegrityError, SignatureVerifier};
use super::version::{VersionTuple, read_embedded_version};

/// File name of the staged archive inside the staging directory.
pub const STAGED_ARCHIVE: &str = "latest.zip";

/// Unrecoverable installation failures.
///
/// Everything else is logged and reported as an [`InstallOutcome`].
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to stage payload at {path}: {source}")]
    Stage { path: PathBuf, source: io::Error },

    #[error("invalid archive {path}: {source}")]
    Archive {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[error("failed to extract {path}: {source}")]
    Extract { path: PathBuf, source: io::Error },
}

/// Result of one update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The release feed could not be queried or understood.
    FeedUnavailable,
    /// Remote version is not newer than the installed one.
    UpToDate {
        local: VersionTuple,
        remote: VersionTuple,
    },
    /// Release has no `binaries.zip`.
    NoPayload,
    /// Release has no usable `signature.bin`.
    Unsigned,
    /// Release has no usable `version.txt`.
    NoVersion,
    /// Payload failed signature verification and was discarded.
    Rejected,
    /// Payload was verified and extracted.
    Installed {
        version: VersionTuple,
        report: ExtractReport,
    },
}

impl InstallOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, InstallOutcome::Installed { .. })
    }
}

/// Checks the release feed and installs newer, correctly signed payloads.
///
/// Holds no state between calls. Must only run while no module instance is
/// loaded from `module_path`.
pub struct ReleaseInstaller {
    transport: Arc<dyn Transport>,
    verifier: SignatureVerifier,
    release_url: String,
    repo_id: String,
    module_path: PathBuf,
    install_dir: PathBuf,
    staging_dir: PathBuf,
}

impl ReleaseInstaller {
    pub fn new(
        transport: Arc<dyn Transport>,
        verifier: SignatureVerifier,
        config: &Config,
    ) -> Self {
        Self {
            transport,
            verifier,
            release_url: config.latest_release_url(),
            repo_id: config.repo_id.clone(),
            module_path: config.module_path.clone(),
            install_dir: config.install_dir.clone(),
            staging_dir: config.staging_dir.clone(),
        }
    }

    /// Build an installer, loading the public key named in `config`.
    pub fn from_config(
        transport: Arc<dyn Transport>,
        config: &Config,
    ) -> Result<Self, IntegrityError> {
        let verifier = SignatureVerifier::from_pem_file(
            &config.public_key_path,
            config.signature_hash,
            config.signature_padding,
        )?;
        Ok(Self::new(transport, verifier, config))
    }

    /// Version of the currently installed module, `0.0.0` if unknown.
    pub fn local_version(&self) -> VersionTuple {
        read_embedded_version(&self.module_path).unwrap_or(VersionTuple::ZERO)
    }

    /// Path of the staged archive.
    pub fn staged_archive(&self) -> PathBuf {
        self.staging_dir.join(STAGED_ARCHIVE)
    }

    /// Run one update check, installing the latest release if it is newer
    /// and correctly signed.
    pub fn check_and_install(&self) -> Result<InstallOutcome, InstallError> {
        tracing::info!("checking for new update");

        let Some(release) = self.fetch_release() else {
            return Ok(InstallOutcome::FeedUnavailable);
        };
        let assets = ReleaseAssets::collect(self.transport.as_ref(), &release);

        let local = self.local_version();
        let remote = assets.remote_version();
        if remote <= local {
            tracing::info!(%local, %remote, "no newer version on remote");
            return Ok(InstallOutcome::UpToDate { local, remote });
        }
        let Some(binaries_url) = assets.binaries_url else {
            tracing::info!("current release does not contain a {}", BINARIES_ASSET);
            return Ok(InstallOutcome::NoPayload);
        };
        let Some(signature) = assets.signature else {
            tracing::warn!(
                "current release does not contain a {}, refusing to install it",
                SIGNATURE_ASSET
            );
            return Ok(InstallOutcome::Unsigned);
        };
        let Some(version) = assets.version else {
            tracing::warn!(
                "current release does not contain a usable {}, refusing to install it",
                VERSION_ASSET
            );
            return Ok(InstallOutcome::NoVersion);
        };

        tracing::info!(%local, %version, "downloading update");
        let payload = match self
            .transport
            .get(&binaries_url, ACCEPT_OCTET_STREAM)
            .and_then(|response| response.error_for_status(&binaries_url))
        {
            Ok(response) => response.body,
            Err(e) => {
                tracing::error!("failed to download {}: {}", BINARIES_ASSET, e);
                return Ok(InstallOutcome::FeedUnavailable);
            }
        };

        if let Err(e) = self.verifier.verify(&payload, &signature) {
            tracing::error!("could not verify signature: {}", e);
            return Ok(InstallOutcome::Rejected);
        }

        let staged = self.stage(&payload)?;
        drop(payload);

        tracing::info!("update downloaded, extracting...");
        let report = extract_archive(&staged, &self.install_dir)?;
        tracing::info!(
            %version,
            written = report.written.len(),
            locked = report.locked.len(),
            "done extracting"
        );

        Ok(InstallOutcome::Installed { version, report })
    }

    fn fetch_release(&self) -> Option<Release> {
        let response = match self.transport.get(&self.release_url, ACCEPT_JSON) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("update request failed: {}", e);
                return None;
            }
        };

        if !response.is_success() {
            if response.status == 404 {
                tracing::error!(
                    "update request was not found, check that {} actually has a release",
                    self.repo_id
                );
            }
            tracing::error!(status = response.status, "issue with update request:\n{}", response.text());
            return None;
        }

        response
            .json()
            .inspect_err(|e| tracing::error!("malformed release metadata: {}", e))
            .ok()
    }

    fn stage(&self, payload: &[u8]) -> Result<PathBuf, InstallError> {
        let path = self.staged_archive();
        let stage_err = |source| InstallError::Stage {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.staging_dir).map_err(stage_err)?;
        fs::write(&path, payload).map_err(stage_err)?;
        Ok(path)
    }
}

impl std::fmt::Debug for ReleaseInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseInstaller")
            .field("release_url", &self.release_url)
            .field("module_path", &self.module_path)
            .field("install_dir", &self.install_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Response;
    use crate::release::extract::tests::zip_bytes;
    use crate::release::{HashAlgorithm, SignaturePadding, Signer};
    use crate::testing::ScriptedTransport;
    use serde_json::json;
    use tempfile::TempDir;

    const SIGNING_KEY: &str = include_str!("../../tests/fixtures/signing_key.pem");
    const RELEASE_URL: &str = "https://api.test/repos/acme/bot/releases/latest";
    const PAYLOAD_URL: &str = "https://api.test/assets/binaries.zip";

    struct Fixture {
        temp: TempDir,
        transport: Arc<ScriptedTransport>,
        signer: Signer,
        config: Config,
    }

    impl Fixture {
        /// Installation with `program` at version 1.1.0 and a data file.
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let install_dir = temp.path().join("install");
            fs::create_dir_all(&install_dir).unwrap();
            fs::write(
                install_dir.join("program"),
                "binary\0warden-module-version=1.1.0\0",
            )
            .unwrap();
            fs::write(install_dir.join("data.txt"), "old data").unwrap();

            let config = Config {
                repo_id: "acme/bot".to_string(),
                api_base: "https://api.test".to_string(),
                module_path: install_dir.join("program"),
                install_dir,
                staging_dir: temp.path().join("updates"),
                ..Config::default()
            };

            Self {
                temp,
                transport: Arc::new(ScriptedTransport::new()),
                signer: Signer::from_pem(SIGNING_KEY, HashAlgorithm::Sha512, SignaturePadding::Pkcs1)
                    .unwrap(),
                config,
            }
        }

        fn installer(&self) -> ReleaseInstaller {
            ReleaseInstaller::new(self.transport.clone(), self.signer.verifier(), &self.config)
        }

        fn new_payload() -> Vec<u8> {
            zip_bytes(&[
                ("program", "binary\0warden-module-version=1.2.0\0"),
                ("data.txt", "new data"),
            ])
        }

        /// Publish a release containing the named assets.
        fn publish(&self, version: &str, payload: &[u8], signature: &[u8], names: &[&str]) {
            let assets = names
                .iter()
                .map(|name| json!({ "name": name, "url": format!("https://api.test/assets/{name}") }))
                .collect::<Vec<_>>();
            self.transport
                .respond_json(RELEASE_URL, json!({ "tag_name": "v", "assets": assets }));
            self.transport.respond(
                "https://api.test/assets/version.txt",
                Response::new(200, version),
            );
            self.transport.respond(
                "https://api.test/assets/signature.bin",
                Response::new(200, signature.to_vec()),
            );
            self.transport
                .respond(PAYLOAD_URL, Response::new(200, payload.to_vec()));
        }

        fn publish_signed(&self, version: &str, names: &[&str]) {
            let payload = Self::new_payload();
            let signature = self.signer.sign(&payload).unwrap();
            self.publish(version, &payload, &signature, names);
        }

        fn installed(&self, name: &str) -> String {
            fs::read_to_string(self.config.install_dir.join(name)).unwrap()
        }

        fn assert_untouched(&self) {
            assert_eq!(self.installed("data.txt"), "old data");
            assert_eq!(self.installer().local_version(), VersionTuple::new(1, 1, 0));
            assert!(!self.installer().staged_archive().exists());
        }
    }

    const ALL: [&str; 3] = ["version.txt", "signature.bin", "binaries.zip"];

    #[test]
    fn test_installs_newer_signed_release() {
        let fx = Fixture::new();
        fx.publish_signed("1.2.0", &ALL);

        let outcome = fx.installer().check_and_install().unwrap();
        match outcome {
            InstallOutcome::Installed { version, report } => {
                assert_eq!(version, VersionTuple::new(1, 2, 0));
                assert_eq!(report.written.len(), 2);
            }
            other => panic!("expected install, got {:?}", other),
        }
        assert_eq!(fx.installed("data.txt"), "new data");
        assert_eq!(fx.installer().local_version(), VersionTuple::new(1, 2, 0));
        assert!(fx.installer().staged_archive().exists());
        assert!(fx.temp.path().join("updates").join(STAGED_ARCHIVE).exists());
    }

    #[test]
    fn test_corrupted_signature_is_rejected() {
        let fx = Fixture::new();
        let payload = Fixture::new_payload();
        let mut signature = fx.signer.sign(&payload).unwrap();
        signature[10] ^= 0x04;
        fx.publish("1.2.0", &payload, &signature, &ALL);

        assert_eq!(
            fx.installer().check_and_install().unwrap(),
            InstallOutcome::Rejected
        );
        fx.assert_untouched();
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let fx = Fixture::new();
        let payload = Fixture::new_payload();
        let signature = fx.signer.sign(&payload).unwrap();
        let mut tampered = payload.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        fx.publish("1.2.0", &tampered, &signature, &ALL);

        assert_eq!(
            fx.installer().check_and_install().unwrap(),
            InstallOutcome::Rejected
        );
        fx.assert_untouched();
    }

    #[test]
    fn test_equal_or_older_never_installs() {
        for remote in ["1.1.0", "1.0.9", "0.9.0", "1.1"] {
            let fx = Fixture::new();
            fx.publish_signed(remote, &ALL);

            let outcome = fx.installer().check_and_install().unwrap();
            assert!(
                matches!(outcome, InstallOutcome::UpToDate { .. }),
                "{remote}: {outcome:?}"
            );
            fx.assert_untouched();
            // The payload is never downloaded.
            assert_eq!(fx.transport.requests_to(PAYLOAD_URL), 0);
        }
    }

    #[test]
    fn test_any_missing_asset_is_a_noop() {
        let cases = [
            (["version.txt", "signature.bin"], InstallOutcome::NoPayload),
            (["version.txt", "binaries.zip"], InstallOutcome::Unsigned),
            (["signature.bin", "binaries.zip"], InstallOutcome::NoVersion),
        ];
        for (names, expected) in cases {
            let fx = Fixture::new();
            fx.publish_signed("1.2.0", &names);

            assert_eq!(fx.installer().check_and_install().unwrap(), expected);
            fx.assert_untouched();
            assert_eq!(fx.transport.requests_to(PAYLOAD_URL), 0);
        }
    }

    #[test]
    fn test_unparsable_version_is_a_noop() {
        let fx = Fixture::new();
        fx.publish_signed("latest", &ALL);

        assert_eq!(
            fx.installer().check_and_install().unwrap(),
            InstallOutcome::NoVersion
        );
        fx.assert_untouched();
    }

    #[test]
    fn test_missing_module_counts_as_zero() {
        let fx = Fixture::new();
        fs::remove_file(&fx.config.module_path).unwrap();
        fx.publish_signed("0.0.1", &ALL);

        assert!(fx.installer().check_and_install().unwrap().is_installed());
        assert!(fx.config.module_path.is_file());
    }

    #[test]
    fn test_missing_release_is_feed_unavailable() {
        let fx = Fixture::new();
        // No release route: the scripted feed answers 404.
        assert_eq!(
            fx.installer().check_and_install().unwrap(),
            InstallOutcome::FeedUnavailable
        );
        fx.assert_untouched();

        fx.transport.fail(RELEASE_URL, "dns failure");
        assert_eq!(
            fx.installer().check_and_install().unwrap(),
            InstallOutcome::FeedUnavailable
        );
    }

    #[test]
    fn test_malformed_release_metadata() {
        let fx = Fixture::new();
        fx.transport
            .respond(RELEASE_URL, Response::new(200, "{\"message\": \"rate limited\"}"));

        assert_eq!(
            fx.installer().check_and_install().unwrap(),
            InstallOutcome::FeedUnavailable
        );
    }

    #[test]
    fn test_payload_download_failure() {
        let fx = Fixture::new();
        fx.publish_signed("1.2.0", &ALL);
        fx.transport.respond(PAYLOAD_URL, Response::new(502, "bad gateway"));

        // The first queued payload answer is the good one; drain it first.
        let queue_drained = fx.transport.get(PAYLOAD_URL, ACCEPT_OCTET_STREAM).unwrap();
        assert!(queue_drained.is_success());

        assert_eq!(
            fx.installer().check_and_install().unwrap(),
            InstallOutcome::FeedUnavailable
        );
        fx.assert_untouched();
    }

    #[test]
    fn test_from_config_reads_public_key() {
        let fx = Fixture::new();
        let key_path = fx.temp.path().join("public.pem");
        fs::write(&key_path, include_str!("../../tests/fixtures/public_key.pem")).unwrap();

        let config = Config {
            public_key_path: key_path,
            ..fx.config.clone()
        };
        let installer = ReleaseInstaller::from_config(fx.transport.clone(), &config).unwrap();
        fx.publish_signed("1.2.0", &ALL);
        assert!(installer.check_and_install().unwrap().is_installed());

        let missing = Config {
            public_key_path: fx.temp.path().join("nope.pem"),
            ..fx.config.clone()
        };
        assert!(ReleaseInstaller::from_config(fx.transport.clone(), &missing).is_err());
    }
}
