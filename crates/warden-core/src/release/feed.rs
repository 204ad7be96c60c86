//! Release feed metadata and asset discovery.

use serde::Deserialize;

use crate::http::{ACCEPT_OCTET_STREAM, Transport};

use super::version::VersionTuple;

pub const VERSION_ASSET: &str = "version.txt";
pub const SIGNATURE_ASSET: &str = "signature.bin";
pub const BINARIES_ASSET: &str = "binaries.zip";

/// The subset of a release resource the installer needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub tag_name: Option<String>,
    pub assets: Vec<Asset>,
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub name: String,
    /// API URL that yields the raw file when asked for `application/octet-stream`.
    pub url: String,
}

/// What was found among a release's assets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseAssets {
    pub version: Option<VersionTuple>,
    pub signature: Option<Vec<u8>>,
    pub binaries_url: Option<String>,
}

impl ReleaseAssets {
    /// Remote version, or the sentinel when the release has none.
    pub fn remote_version(&self) -> VersionTuple {
        self.version.unwrap_or(VersionTuple::SENTINEL)
    }

    /// Scan `release` once for the three named assets.
    ///
    /// The version and signature are downloaded as they are found; the
    /// payload is only remembered by URL. Asset order is not significant.
    /// Download failures leave the asset missing.
    pub fn collect(transport: &dyn Transport, release: &Release) -> Self {
        let mut assets = Self::default();
        let mut found = 0;

        for asset in &release.assets {
            match asset.name.as_str() {
                VERSION_ASSET => {
                    found += 1;
                    assets.version = download(transport, asset).and_then(|bytes| {
                        let text = String::from_utf8_lossy(&bytes);
                        text.parse::<VersionTuple>()
                            .inspect_err(|e| tracing::warn!("ignoring {}: {}", VERSION_ASSET, e))
                            .ok()
                    });
                }
                SIGNATURE_ASSET => {
                    found += 1;
                    assets.signature = download(transport, asset);
                }
                BINARIES_ASSET => {
                    found += 1;
                    assets.binaries_url = Some(asset.url.clone());
                }
                _ => continue,
            }
            if found == 3 {
                break;
            }
        }

        assets
    }
}

/// Download a small asset fully, logging failures.
fn download(transport: &dyn Transport, asset: &Asset) -> Option<Vec<u8>> {
    match transport
        .get(&asset.url, ACCEPT_OCTET_STREAM)
        .and_then(|response| response.error_for_status(&asset.url))
    {
        Ok(response) => Some(response.body),
        Err(e) => {
            tracing::warn!(asset = %asset.name, "asset download failed: {}", e);
            None
        }
    }
}
