//! Purpose: Forward-only feature sequence over a store file.
//! Exports: `Reader`.
//! Role: Read path of the store and the input side of every write session.
//! Invariants: The shared store lock is held from open until close/drop, so the file a
//!             reader started on cannot be replaced underneath it.
//! Invariants: Identifiers are 0-based positions, restarting on every open.
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::core::error::{Error, io_error};
use crate::core::lock::{LockGuard, StoreLock};
use crate::core::record::{Feature, decode_record};
use crate::core::schema::FeatureType;
use crate::core::tokenize::LineTokenizer;

pub struct Reader {
    path: PathBuf,
    feature_type: Arc<FeatureType>,
    tokenizer: Option<LineTokenizer<BufReader<File>>>,
    next_id: u64,
    pending: Option<Feature>,
    _guard: LockGuard,
}

impl Reader {
    /// Takes the shared lock, then opens the file and skips its header.
    /// A missing file reads as an empty sequence.
    pub(crate) fn open(
        path: &Path,
        lock: &StoreLock,
        feature_type: Arc<FeatureType>,
        separator: char,
    ) -> Result<Self, Error> {
        let guard = lock.shared()?;
        let tokenizer = match File::open(path) {
            Ok(file) => {
                let mut tokenizer = LineTokenizer::new(BufReader::new(file), separator);
                tokenizer
                    .next_record()
                    .map_err(|err| io_error(path, err))?;
                Some(tokenizer)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(io_error(path, err)),
        };
        debug!(path = %path.display(), "reader opened");
        Ok(Self {
            path: path.to_path_buf(),
            feature_type,
            tokenizer,
            next_id: 0,
            pending: None,
            _guard: guard,
        })
    }

    pub fn feature_type(&self) -> &Arc<FeatureType> {
        &self.feature_type
    }

    pub fn has_next(&mut self) -> Result<bool, Error> {
        if self.pending.is_none() {
            self.pending = self.read_next()?;
        }
        Ok(self.pending.is_some())
    }

    /// Next feature, or `None` once the file is exhausted.
    pub fn next_feature(&mut self) -> Result<Option<Feature>, Error> {
        self.has_next()?;
        Ok(self.pending.take())
    }

    /// Identifier the next produced feature will carry, counting a buffered one.
    pub(crate) fn next_id(&self) -> u64 {
        match &self.pending {
            Some(feature) => feature.id(),
            None => self.next_id,
        }
    }

    /// Releases the shared lock.
    pub fn close(self) {
        debug!(path = %self.path.display(), "reader closed");
    }

    fn read_next(&mut self) -> Result<Option<Feature>, Error> {
        let Some(tokenizer) = self.tokenizer.as_mut() else {
            return Ok(None);
        };
        let Some(fields) = tokenizer
            .next_record()
            .map_err(|err| io_error(&self.path, err))?
        else {
            return Ok(None);
        };
        let id = self.next_id;
        self.next_id += 1;
        decode_record(&self.feature_type, id, &fields)
            .map(Some)
            .map_err(|err| err.with_line(tokenizer.line()).with_path(&self.path))
    }
}

impl Iterator for Reader {
    type Item = Result<Feature, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_feature().transpose()
    }
}
