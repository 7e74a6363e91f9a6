//! Filesystem-backed platform implementations for desktop and server hosts.
//!
//! Blob writes follow the temp-file, fsync, rename sequence so readers see
//! either the old content or the new content, never a partial write.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{StoreError, StoreResult};

use super::{AtomicBlobStore, BootSession, Clock};

fn io_error(context: &str, path: &Path, err: &std::io::Error) -> StoreError {
    StoreError::BlobStore(format!("{context} {}: {err}", path.display()))
}

/// Blob store keeping one file per blob in a directory.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    directory: PathBuf,
}

impl FileBlobStore {
    /// Creates a blob store rooted at `directory`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(directory: P) -> StoreResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|err| io_error("create", &directory, &err))?;
        Ok(Self { directory })
    }

    fn blob_path(&self, name: &str) -> StoreResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StoreError::BlobStore(format!("invalid blob name: {name:?}")));
        }
        Ok(self.directory.join(name))
    }
}

impl AtomicBlobStore for FileBlobStore {
    fn read(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.blob_path(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error("read", &path, &err)),
        }
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> StoreResult<()> {
        let path = self.blob_path(name)?;
        let tmp = self.directory.join(format!(".{name}.tmp"));
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)
                .map_err(|err| io_error("open", &tmp, &err))?;
            file.write_all(bytes)
                .map_err(|err| io_error("write", &tmp, &err))?;
            file.sync_all().map_err(|err| io_error("sync", &tmp, &err))?;
        }
        fs::rename(&tmp, &path).map_err(|err| {
            let _ = fs::remove_file(&tmp);
            io_error("rename", &path, &err)
        })
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        let path = self.blob_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error("remove", &path, &err)),
        }
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
            })
    }
}

/// Boot session read from the kernel's per-boot random identifier.
#[derive(Debug, Clone)]
pub struct KernelBootSession {
    source: PathBuf,
}

impl KernelBootSession {
    /// Linux location of the boot identifier.
    pub const LINUX_BOOT_ID: &'static str = "/proc/sys/kernel/random/boot_id";

    /// Reads the identifier from the standard Linux location.
    #[must_use]
    pub fn new() -> Self {
        Self::from_path(Self::LINUX_BOOT_ID)
    }

    /// Reads the identifier from `source`.
    #[must_use]
    pub fn from_path(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl Default for KernelBootSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BootSession for KernelBootSession {
    fn current_boot_id(&self) -> StoreResult<String> {
        let raw = fs::read_to_string(&self.source).map_err(|err| {
            StoreError::Platform(format!("read {}: {err}", self.source.display()))
        })?;
        let id = raw.trim();
        if id.is_empty() {
            return Err(StoreError::Platform("empty boot id".into()));
        }
        Ok(id.to_string())
    }
}
