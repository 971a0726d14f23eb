//! Purpose: Full-rewrite write session over a store file.
//! Exports: `Writer`.
//! Role: Streams existing features through the caller (keep, modify, remove), then appends
//!       new ones, staging everything in `<file>.staging` before an atomic rename.
//! Invariants: The original file changes only in `close`, by rename, under the exclusive lock.
//! Invariants: The staging lock is held for the whole session, so sessions never overlap.
//! Invariants: A session dropped without `close` deletes its staging file.
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::lock::{LockGuard, StoreLock, staging_path};
use crate::core::notify::{ChangeSet, Listeners};
use crate::core::reader::Reader;
use crate::core::record::{Feature, encode_record};
use crate::core::schema::{FeatureType, encode_header};

struct Current {
    feature: Feature,
    // Read from the file rather than appended.
    existing: bool,
    written: bool,
    removed: bool,
}

pub struct Writer {
    path: PathBuf,
    staging_path: PathBuf,
    separator: char,
    feature_type: Arc<FeatureType>,
    lock: StoreLock,
    listeners: Arc<Listeners>,
    reader: Option<Reader>,
    staging: Option<BufWriter<File>>,
    current: Option<Current>,
    appending: bool,
    next_append_id: u64,
    changes: ChangeSet,
    committed: bool,
    _staging_guard: LockGuard,
}

impl Writer {
    pub(crate) fn open(
        path: &Path,
        lock: &StoreLock,
        staging_lock: &StoreLock,
        feature_type: Arc<FeatureType>,
        separator: char,
        listeners: Arc<Listeners>,
    ) -> Result<Self, Error> {
        // Staging lock first: a writer waiting on it must not hold the shared lock,
        // or the active writer's final swap could never get the exclusive side.
        let staging_guard = staging_lock.exclusive()?;
        let reader = Reader::open(path, lock, Arc::clone(&feature_type), separator)?;
        let staging_path = staging_path(path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&staging_path)
            .map_err(|err| io_error(&staging_path, err))?;

        let mut writer = Self {
            path: path.to_path_buf(),
            staging_path,
            separator,
            feature_type,
            lock: lock.clone(),
            listeners,
            reader: Some(reader),
            staging: Some(BufWriter::new(file)),
            current: None,
            appending: false,
            next_append_id: 0,
            changes: ChangeSet::default(),
            committed: false,
            _staging_guard: staging_guard,
        };
        let header = encode_header(&writer.feature_type, separator);
        writer.write_line(&header)?;
        debug!(path = %writer.path.display(), "write session opened");
        Ok(writer)
    }

    pub fn feature_type(&self) -> &Arc<FeatureType> {
        &self.feature_type
    }

    /// True once existing features are exhausted and `next` yields new ones.
    pub fn is_appending(&self) -> bool {
        self.appending
    }

    /// Whether an existing feature remains. `next` succeeds even when this is false.
    pub fn has_next(&mut self) -> Result<bool, Error> {
        if self.appending {
            return Ok(false);
        }
        self.reader_mut()?.has_next()
    }

    /// Flushes the previous feature, then moves to the next existing one or, past the
    /// end, to a fresh all-null feature that will be appended.
    pub fn next(&mut self) -> Result<&mut Feature, Error> {
        if self.current.is_some() {
            self.write()?;
            self.current = None;
        }

        let existing = if self.appending {
            None
        } else {
            self.reader_mut()?.next_feature()?
        };
        let current = match existing {
            Some(feature) => Current {
                feature,
                existing: true,
                written: false,
                removed: false,
            },
            None => {
                if !self.appending {
                    self.appending = true;
                    self.next_append_id = self.reader_mut()?.next_id();
                }
                let id = self.next_append_id;
                self.next_append_id += 1;
                Current {
                    feature: Feature::new(Arc::clone(&self.feature_type)).with_id(id),
                    existing: false,
                    written: false,
                    removed: false,
                }
            }
        };
        Ok(&mut self.current.insert(current).feature)
    }

    pub fn current_mut(&mut self) -> Option<&mut Feature> {
        self.current
            .as_mut()
            .filter(|current| !current.removed)
            .map(|current| &mut current.feature)
    }

    /// Replaces the values of the current feature with those of `feature`.
    pub fn replace_current(&mut self, feature: Feature) -> Result<(), Error> {
        let current = self.current.as_mut().ok_or_else(no_feature_selected)?;
        if current.written || current.removed {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("current feature can no longer be modified"));
        }
        current.feature.assign_from(feature)
    }

    /// Drops the current feature from the rewritten file.
    pub fn remove(&mut self) -> Result<(), Error> {
        let current = self.current.as_mut().ok_or_else(no_feature_selected)?;
        if current.written {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("current feature was already written"));
        }
        if !current.removed {
            current.removed = true;
            if current.existing {
                self.changes.deleted.insert(current.feature.id());
            }
        }
        Ok(())
    }

    /// Writes the current feature to the staging file. Repeated calls for the same
    /// feature write it once. Every existing feature written counts as updated.
    pub fn write(&mut self) -> Result<(), Error> {
        let current = self.current.as_mut().ok_or_else(no_feature_selected)?;
        if current.written || current.removed {
            return Ok(());
        }
        let line = encode_record(&current.feature, self.separator)?;
        current.written = true;

        let id = current.feature.id();
        if current.existing {
            self.changes.updated.insert(id);
        } else {
            self.changes.added.insert(id);
        }
        self.write_line(&line)
    }

    /// Copies remaining existing features and appends `feature`. Returns its id.
    pub fn append(&mut self, feature: Feature) -> Result<u64, Error> {
        if !self.feature_type.same_columns(feature.feature_type()) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("feature does not match the store schema")
                .with_hint("Build features from the store's schema()."));
        }
        while self.has_next()? {
            self.next()?;
        }
        let slot = self.next()?;
        slot.assign_from(feature)?;
        let id = slot.id();
        self.write()?;
        Ok(id)
    }

    /// Commits the session: flush, release the shared lock, swap the staging file in
    /// under the exclusive lock, then notify listeners.
    pub fn close(mut self) -> Result<ChangeSet, Error> {
        if self.current.is_some() {
            self.write()?;
            self.current = None;
        }

        let staging = self.staging.take().ok_or_else(session_closed)?;
        let file = staging
            .into_inner()
            .map_err(|err| io_error(&self.staging_path, err.into_error()))?;
        file.sync_all()
            .map_err(|err| io_error(&self.staging_path, err))?;
        drop(file);

        if let Some(reader) = self.reader.take() {
            reader.close();
        }

        {
            let _exclusive = self.lock.exclusive()?;
            fs::rename(&self.staging_path, &self.path).map_err(|err| {
                io_error(&self.path, err).with_message("failed to replace store file")
            })?;
        }
        self.committed = true;
        // Best effort: make the rename itself durable.
        if let Some(dir) = self.path.parent().and_then(|parent| File::open(parent).ok()) {
            let _ = dir.sync_all();
        }

        let changes = std::mem::take(&mut self.changes);
        debug!(
            path = %self.path.display(),
            added = changes.added.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            "write session committed"
        );
        self.listeners.features_changed(&changes);
        Ok(changes)
    }

    fn reader_mut(&mut self) -> Result<&mut Reader, Error> {
        self.reader.as_mut().ok_or_else(session_closed)
    }

    fn write_line(&mut self, line: &str) -> Result<(), Error> {
        let staging = self.staging.as_mut().ok_or_else(session_closed)?;
        staging
            .write_all(line.as_bytes())
            .and_then(|()| staging.write_all(b"\n"))
            .map_err(|err| io_error(&self.staging_path, err))
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.staging = None;
        match fs::remove_file(&self.staging_path) {
            Ok(()) => debug!(path = %self.staging_path.display(), "write session abandoned"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                path = %self.staging_path.display(),
                error = %err,
                "failed to remove staging file"
            ),
        }
    }
}

fn no_feature_selected() -> Error {
    Error::new(ErrorKind::Usage)
        .with_message("no feature selected")
        .with_hint("Call next() before remove() or write().")
}

fn session_closed() -> Error {
    Error::new(ErrorKind::Internal).with_message("write session already closed")
}
