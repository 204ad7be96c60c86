//! Publishing side: produce `signature.bin` for a release directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::feed::{BINARIES_ASSET, SIGNATURE_ASSET, VERSION_ASSET};
use super::signature::{HashAlgorithm, IntegrityError, SignaturePadding, Signer};
use super::version::{ParseVersionError, VersionTuple};

#[derive(Debug, Error)]
pub enum SignError {
    #[error("missing {0}")]
    Missing(PathBuf),

    #[error("failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("{VERSION_ASSET} is not a version: {0}")]
    Version(#[from] ParseVersionError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// A release signed by [`sign_release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRelease {
    pub version: VersionTuple,
    pub signature_path: PathBuf,
}

/// Sign `<dir>/binaries.zip` with the private key at `secret`.
///
/// `<dir>/version.txt` must hold a valid version. Any previous
/// `<dir>/signature.bin` is replaced.
pub fn sign_release(
    dir: &Path,
    secret: &Path,
    hash: HashAlgorithm,
    padding: SignaturePadding,
) -> Result<SignedRelease, SignError> {
    let binaries = dir.join(BINARIES_ASSET);
    let version_path = dir.join(VERSION_ASSET);
    for required in [secret, binaries.as_path(), version_path.as_path()] {
        if !required.is_file() {
            return Err(SignError::Missing(required.to_path_buf()));
        }
    }

    let version: VersionTuple = read(&version_path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())?
        .parse()?;

    let signer = Signer::from_pem_file(secret, hash, padding)?;
    let signature = signer.sign(&read(&binaries)?)?;

    let signature_path = dir.join(SIGNATURE_ASSET);
    fs::write(&signature_path, signature).map_err(|source| SignError::Io {
        path: signature_path.clone(),
        source,
    })?;
    tracing::info!(%version, path = %signature_path.display(), %hash, "signed release");

    Ok(SignedRelease {
        version,
        signature_path,
    })
}

fn read(path: &Path) -> Result<Vec<u8>, SignError> {
    fs::read(path).map_err(|source| SignError::Io {
        path: path.to_path_buf(),
        source,
    })
}
