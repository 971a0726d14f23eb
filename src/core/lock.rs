// Advisory file locks guarding a store file and its staging file.
//
// Locks live on sidecar files (`<file>.lock`, `<file>.staging.lock`) because the
// data file itself is replaced by rename on every write session. Each guard owns
// its own handle, so guards taken by different threads or processes contend.
// Acquisition order is staging lock first, store lock second.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::error::{Error, ErrorKind};

const STORE_LOCK_SUFFIX: &str = ".lock";
const STAGING_SUFFIX: &str = ".staging";

pub(crate) fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn staging_path(path: &Path) -> PathBuf {
    sidecar_path(path, STAGING_SUFFIX)
}

/// Reader/writer lock over one store file.
#[derive(Clone, Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn for_store(store_path: &Path) -> Self {
        Self {
            path: sidecar_path(store_path, STORE_LOCK_SUFFIX),
        }
    }

    /// Lock serializing writers and schema replacement for `store_path`.
    pub fn staging_for_store(store_path: &Path) -> Self {
        Self {
            path: sidecar_path(&staging_path(store_path), STORE_LOCK_SUFFIX),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until no exclusive holder remains.
    pub fn shared(&self) -> Result<LockGuard, Error> {
        let file = self.open()?;
        file.lock_shared().map_err(|err| self.lock_error(err))?;
        Ok(LockGuard { file })
    }

    /// Blocks until every other holder has released.
    pub fn exclusive(&self) -> Result<LockGuard, Error> {
        let file = self.open()?;
        file.lock_exclusive().map_err(|err| self.lock_error(err))?;
        Ok(LockGuard { file })
    }

    /// Non-blocking variant of [`StoreLock::exclusive`]; contention maps to `Busy`.
    pub fn try_exclusive(&self) -> Result<LockGuard, Error> {
        let file = self.open()?;
        file.try_lock_exclusive().map_err(|err| self.lock_error(err))?;
        Ok(LockGuard { file })
    }

    fn open(&self) -> Result<File, Error> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|err| {
                Error::new(lock_error_kind(&err))
                    .with_message("failed to open lock file")
                    .with_path(&self.path)
                    .with_source(err)
            })
    }

    fn lock_error(&self, err: io::Error) -> Error {
        Error::new(lock_error_kind(&err))
            .with_message("failed to acquire lock")
            .with_path(&self.path)
            .with_source(err)
    }
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
}

impl LockGuard {
    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}
