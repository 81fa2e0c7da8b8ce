//! Thin wrappers over the OS filesystem primitives the store relies on.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use filetime::FileTime;

/// Hard-link `source` to `target`, copying instead when linking is not
/// possible (cross-device, or a filesystem that refuses links).
///
/// An already-existing target means a concurrent ingest of the same content
/// won the race, which counts as success.
pub fn hard_link_or_copy(source: &Path, target: &Path) -> io::Result<()> {
    match fs::hard_link(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(_) => {
            fs::copy(source, target)?;
            Ok(())
        }
    }
}

/// Mark a file read-only.
pub fn set_readonly(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)
}

/// Last-modified time as integer milliseconds since the Unix epoch.
pub fn modified_millis(path: &Path) -> io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(since_epoch.as_millis() as u64)
}

/// Stamp a file's last-modified time from integer milliseconds.
pub fn set_modified_millis(path: &Path, millis: u64) -> io::Result<()> {
    let secs = (millis / 1000) as i64;
    let nanos = ((millis % 1000) * 1_000_000) as u32;
    filetime::set_file_mtime(path, FileTime::from_unix_time(secs, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn test_mtime_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stamped");
        File::create(&path).unwrap().write_all(b"x").unwrap();

        set_modified_millis(&path, 1_714_000_012_345).unwrap();
        assert_eq!(modified_millis(&path).unwrap(), 1_714_000_012_345);
    }

    #[test]
    fn test_link_falls_back_to_copy_on_existing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a");
        let target = dir.path().join("b");
        fs::write(&source, b"payload").unwrap();
        fs::write(&target, b"payload").unwrap();

        hard_link_or_copy(&source, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"payload");
    }

    #[test]
    fn test_set_readonly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro");
        fs::write(&path, b"locked").unwrap();

        set_readonly(&path).unwrap();
        assert!(fs::metadata(&path).unwrap().permissions().readonly());
    }
}
