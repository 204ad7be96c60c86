//! Archive extraction over a live installation.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use super::installer::InstallError;

/// Files touched by an extraction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    /// Files written, relative to the destination.
    pub written: Vec<PathBuf>,
    /// Files left untouched because they were locked or in use.
    pub locked: Vec<PathBuf>,
    /// Entries refused because their name escapes the destination.
    pub rejected: Vec<String>,
}

/// Extract every entry of `archive` over `dest`, overwriting existing files.
///
/// Targets that are locked or busy are skipped with a warning; any other
/// I/O failure aborts the extraction.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<ExtractReport, InstallError> {
    let file = File::open(archive).map_err(|source| InstallError::Extract {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(|source| InstallError::Archive {
        path: archive.to_path_buf(),
        source,
    })?;

    let mut report = ExtractReport::default();
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|source| InstallError::Archive {
            path: archive.to_path_buf(),
            source,
        })?;

        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(entry = entry.name(), "skipping archive entry outside the install directory");
            report.rejected.push(entry.name().to_string());
            continue;
        };
        let target = dest.join(&relative);
        let extract_err = |source| InstallError::Extract {
            path: target.clone(),
            source,
        };

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(extract_err)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(extract_err)?;
        }

        match write_entry(&mut entry, &target) {
            Ok(()) => {}
            Err(e) if is_locked(&e) => {
                tracing::warn!(path = %target.display(), "cannot access file, leaving it in place");
                report.locked.push(relative);
                continue;
            }
            Err(e) => return Err(extract_err(e)),
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(extract_err)?;
        }

        tracing::debug!(path = %target.display(), "extracted");
        report.written.push(relative);
    }

    Ok(report)
}

fn write_entry(entry: &mut impl io::Read, target: &Path) -> io::Result<()> {
    let mut out = File::create(target)?;
    io::copy(entry, &mut out)?;
    out.sync_all()
}

/// Whether an I/O error means the target is held open by someone else.
fn is_locked(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ETXTBSY)
    }
    #[cfg(windows)]
    {
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    /// Build a zip archive in memory from `(name, contents)` pairs.
    pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(name.trim_end_matches('/'), SimpleFileOptions::default())
                    .unwrap();
                continue;
            }
            writer
                .start_file(*name, SimpleFileOptions::default().unix_permissions(0o755))
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_overwrites() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("install");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("program"), b"old").unwrap();
        fs::write(dest.join("keep.txt"), b"untouched").unwrap();

        let archive = temp.path().join("latest.zip");
        fs::write(
            &archive,
            zip_bytes(&[("program", "new"), ("lib/", ""), ("lib/data.bin", "\x00\x01")]),
        )
        .unwrap();

        let report = extract_archive(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("program")).unwrap(), b"new");
        assert_eq!(fs::read(dest.join("lib/data.bin")).unwrap(), b"\x00\x01");
        assert_eq!(fs::read(dest.join("keep.txt")).unwrap(), b"untouched");
        assert_eq!(
            report.written,
            vec![PathBuf::from("program"), PathBuf::from("lib/data.bin")]
        );
        assert!(report.locked.is_empty());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.join("program")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_rejects_escaping_entries() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("install");
        fs::create_dir_all(&dest).unwrap();

        let archive = temp.path().join("latest.zip");
        fs::write(&archive, zip_bytes(&[("../evil", "x"), ("ok", "y")])).unwrap();

        let report = extract_archive(&archive, &dest).unwrap();
        assert!(!temp.path().join("evil").exists());
        assert_eq!(report.rejected, vec!["../evil".to_string()]);
        assert_eq!(report.written, vec![PathBuf::from("ok")]);
    }

    #[test]
    fn test_corrupt_archive_is_fatal() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("latest.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        assert!(matches!(
            extract_archive(&archive, temp.path()),
            Err(InstallError::Archive { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_target_is_fatal() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("install");
        // A directory where the archive wants a file.
        fs::create_dir_all(dest.join("program")).unwrap();

        let archive = temp.path().join("latest.zip");
        fs::write(&archive, zip_bytes(&[("program", "new")])).unwrap();

        assert!(matches!(
            extract_archive(&archive, &dest),
            Err(InstallError::Extract { .. })
        ));
    }

    #[test]
    fn test_is_locked() {
        #[cfg(unix)]
        assert!(is_locked(&io::Error::from_raw_os_error(libc::ETXTBSY)));
        assert!(!is_locked(&io::Error::new(io::ErrorKind::PermissionDenied, "no")));
    }
}
