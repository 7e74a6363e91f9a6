//! Whole-file reads and crash-safe writes.
//!
//! Writes go to a temporary sibling, are fsynced, then renamed over the
//! target, so a reader sees either the old file or the new one.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{DbError, DbResult};

pub(crate) fn read_if_exists(path: &Path) -> DbResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(DbError::io(format!("read {}", path.display()), err)),
    }
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> DbResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| DbError::io(format!("create {}", parent.display()), err))?;
    }

    let tmp = temp_path(path);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|err| DbError::io(format!("open {}", tmp.display()), err))?;
        file.write_all(bytes)
            .map_err(|err| DbError::io(format!("write {}", tmp.display()), err))?;
        file.sync_all()
            .map_err(|err| DbError::io(format!("sync {}", tmp.display()), err))?;
    }

    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(DbError::io(format!("rename to {}", path.display()), err));
    }

    sync_parent(path);
    Ok(())
}

pub(crate) fn remove_if_exists(path: &Path) -> DbResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(DbError::io(format!("remove {}", path.display()), err)),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// Best effort: the rename is already durable on most filesystems.
#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
const fn sync_parent(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("logins.db");
        write_atomic(&path, b"one").expect("write");
        write_atomic(&path, b"two").expect("overwrite");
        assert_eq!(read_if_exists(&path).expect("read"), Some(b"two".to_vec()));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_missing_file_reads_none_and_removes_cleanly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.db");
        assert_eq!(read_if_exists(&path).expect("read"), None);
        remove_if_exists(&path).expect("remove");
    }
}
