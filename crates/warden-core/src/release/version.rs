//! Release version numbers and the version marker embedded in module executables.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Prefix of the version marker the `warden` SDK embeds in module executables.
///
/// The full marker is `warden-module-version=<major.minor.patch>\0`.
pub const VERSION_MARKER: &[u8] = b"warden-module-version=";

/// Three component version with total ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionTuple {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionTuple {
    /// Assumed remote version when a release carries no `version.txt`.
    ///
    /// Higher than anything real. It must never be the only thing standing
    /// between a release and an install; the installer also refuses releases
    /// without a version asset.
    pub const SENTINEL: Self = Self::new(99, 99, 99);

    /// Assumed local version when the installed module is missing or unmarked.
    pub const ZERO: Self = Self::new(0, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for VersionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version `{0}`")]
pub struct ParseVersionError(String);

impl FromStr for VersionTuple {
    type Err = ParseVersionError;

    /// Accepts `1.2`, `1.2.3`, `v1.2.3` and `1.2.3.4`; a fourth component is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let parts = trimmed
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| err())?;

        match parts.as_slice() {
            [major, minor] => Ok(Self::new(*major, *minor, 0)),
            [major, minor, patch] | [major, minor, patch, _] => {
                Ok(Self::new(*major, *minor, *patch))
            }
            _ => Err(err()),
        }
    }
}

/// Read the version embedded in a module executable.
///
/// Returns `None` when the file cannot be read or carries no valid marker.
pub fn read_embedded_version(path: &Path) -> Option<VersionTuple> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(path = %path.display(), "cannot read module for version: {}", e);
            return None;
        }
    };
    find_marker(&bytes)
}

/// First occurrence of the marker followed by a parsable version.
///
/// Earlier occurrences without a version (e.g. the needle itself when this
/// crate is linked into the module) are skipped.
fn find_marker(bytes: &[u8]) -> Option<VersionTuple> {
    let mut rest = bytes;
    while let Some(pos) = rest
        .windows(VERSION_MARKER.len())
        .position(|w| w == VERSION_MARKER)
    {
        rest = &rest[pos + VERSION_MARKER.len()..];
        let end = rest
            .iter()
            .position(|b| !(b.is_ascii_digit() || *b == b'.'))
            .unwrap_or(rest.len());
        let terminated = rest.get(end) == Some(&0);
        if terminated
            && let Some(version) = std::str::from_utf8(&rest[..end])
                .ok()
                .and_then(|s| s.parse().ok())
        {
            return Some(version);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_forms() {
        assert_eq!("1.2.3".parse(), Ok(VersionTuple::new(1, 2, 3)));
        assert_eq!(" v1.2.0\n".parse(), Ok(VersionTuple::new(1, 2, 0)));
        assert_eq!("1.2".parse(), Ok(VersionTuple::new(1, 2, 0)));
        assert_eq!("1.2.3.4".parse(), Ok(VersionTuple::new(1, 2, 3)));

        for bad in ["", "1", "1.x.3", "1.2.3.4.5", "1..3", "-1.2.3"] {
            assert!(bad.parse::<VersionTuple>().is_err(), "{bad:?} parsed");
        }
    }

    #[test]
    fn test_ordering() {
        let v = |s: &str| s.parse::<VersionTuple>().unwrap();
        assert!(v("1.2.0") > v("1.1.0"));
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert!(v("1.1.1") > v("1.1.0"));
        assert_eq!(v("1.1.0"), v("1.1"));
        assert!(VersionTuple::SENTINEL > v("99.99.98"));
        assert!(VersionTuple::ZERO < v("0.0.1"));
    }

    #[test]
    fn test_display() {
        assert_eq!(VersionTuple::new(1, 2, 3).to_string(), "1.2.3");
    }

    #[test]
    fn test_find_marker() {
        let mut bytes = b"\x7fELF junk warden-module-version= more junk ".to_vec();
        bytes.extend_from_slice(b"warden-module-version=1.4.2\0trailing");
        assert_eq!(find_marker(&bytes), Some(VersionTuple::new(1, 4, 2)));

        assert_eq!(find_marker(b"warden-module-version=1.4.2"), None);
        assert_eq!(find_marker(b"no marker here"), None);
    }

    #[test]
    fn test_read_embedded_version() {
        let temp = TempDir::new().unwrap();
        let module = temp.path().join("program");
        std::fs::write(&module, b"prefix\0warden-module-version=1.1.0\0suffix").unwrap();

        assert_eq!(read_embedded_version(&module), Some(VersionTuple::new(1, 1, 0)));
        assert_eq!(read_embedded_version(&temp.path().join("missing")), None);
    }
}
