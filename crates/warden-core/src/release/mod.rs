//! Release feed, payload verification and installation.

mod extract;
mod feed;
mod installer;
mod signature;
mod signing;
mod version;

pub use extract::{ExtractReport, extract_archive};
pub use feed::{Asset, BINARIES_ASSET, Release, ReleaseAssets, SIGNATURE_ASSET, VERSION_ASSET};
pub use installer::{InstallError, InstallOutcome, ReleaseInstaller, STAGED_ARCHIVE};
pub use signature::{HashAlgorithm, IntegrityError, SignatureVerifier, SignaturePadding, Signer};
pub use signing::{SignError, SignedRelease, sign_release};
pub use version::{ParseVersionError, VERSION_MARKER, VersionTuple, read_embedded_version};
