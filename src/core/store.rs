//! Purpose: Entry point owning one store file, its locks, and its cached schema.
//! Exports: `Store`, `StoreOptions`, `DEFAULT_SEPARATOR`.
//! Role: Wires tokenizer, codecs, reader, and writer into read/add/remove/replace operations.
//! Invariants: Lock order is staging lock, then store lock.
//! Invariants: The schema cache mutex is never held while waiting on a file lock.
//! Invariants: The cached schema always matches the header on disk once loaded.
//! Invariants: A thread holding a `Reader` must not start a write on the same store;
//!             the commit would wait on that reader forever.
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::lock::{StoreLock, staging_path};
use crate::core::notify::{ChangeListener, ChangeSet, Listeners};
use crate::core::reader::Reader;
use crate::core::record::Feature;
use crate::core::schema::{FeatureType, encode_header, read_schema};
use crate::core::tokenize::{COMMENT_MARKER, LineTokenizer, QUOTE, count_records};
use crate::core::writer::Writer;

pub const DEFAULT_SEPARATOR: char = ';';

#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub separator: char,
    /// Schema to initialize an empty file with.
    pub schema: Option<FeatureType>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR,
            schema: None,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_schema(mut self, schema: FeatureType) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        let separator = self.separator;
        if separator == QUOTE || separator == COMMENT_MARKER || separator == '\n' || separator == '\r'
        {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid separator {separator:?}"))
                .with_hint("Use a character other than quote, '#', or a line break."));
        }
        Ok(())
    }
}

pub struct Store {
    path: PathBuf,
    name: String,
    separator: char,
    lock: StoreLock,
    staging_lock: StoreLock,
    schema: Mutex<Option<Arc<FeatureType>>>,
    listeners: Arc<Listeners>,
}

impl Store {
    /// Opens (without creating) the store at `path`. A schema in `options` is written
    /// when the file has no header yet; a different existing header is a usage error.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, Error> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "features".to_string());
        let store = Self {
            lock: StoreLock::for_store(&path),
            staging_lock: StoreLock::staging_for_store(&path),
            path,
            name,
            separator: options.separator,
            schema: Mutex::new(None),
            listeners: Arc::new(Listeners::default()),
        };

        if let Some(requested) = options.schema {
            match store.schema()? {
                None => {
                    store.update_schema(requested)?;
                }
                Some(existing) if existing.same_columns(&requested) => {}
                Some(_) => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("store file already has a different schema")
                        .with_path(&store.path)
                        .with_hint("Use update_schema() to replace it; this deletes all features."));
                }
            }
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Schema from the header line, loaded once and cached. `None` means the file is
    /// missing or has no header yet.
    pub fn schema(&self) -> Result<Option<Arc<FeatureType>>, Error> {
        if let Some(feature_type) = self.cache()?.as_ref() {
            return Ok(Some(Arc::clone(feature_type)));
        }
        let Some(loaded) = self.read_header()? else {
            return Ok(None);
        };
        // A concurrent update_schema may have filled the cache meanwhile; it wins.
        let mut cached = self.cache()?;
        let feature_type = cached.get_or_insert(loaded);
        Ok(Some(Arc::clone(feature_type)))
    }

    pub fn features(&self) -> Result<Reader, Error> {
        let feature_type = self.require_schema()?;
        Reader::open(&self.path, &self.lock, feature_type, self.separator)
    }

    /// Raw write session. Most callers want `add`, `remove_if`, or `replace_if`.
    pub fn writer(&self) -> Result<Writer, Error> {
        let feature_type = self.require_schema()?;
        Writer::open(
            &self.path,
            &self.lock,
            &self.staging_lock,
            feature_type,
            self.separator,
            Arc::clone(&self.listeners),
        )
    }

    pub fn add<I>(&self, features: I) -> Result<ChangeSet, Error>
    where
        I: IntoIterator<Item = Feature>,
    {
        let mut writer = self.writer()?;
        for feature in features {
            writer.append(feature)?;
        }
        writer.close()
    }

    pub fn remove_if<P>(&self, mut predicate: P) -> Result<ChangeSet, Error>
    where
        P: FnMut(&Feature) -> bool,
    {
        let mut writer = self.writer()?;
        while writer.has_next()? {
            let feature = writer.next()?;
            if predicate(feature) {
                writer.remove()?;
            }
        }
        writer.close()
    }

    /// Passes each matching feature to `mapper`; `Some` replaces its values, `None`
    /// removes it.
    pub fn replace_if<P, M>(&self, mut predicate: P, mut mapper: M) -> Result<ChangeSet, Error>
    where
        P: FnMut(&Feature) -> bool,
        M: FnMut(Feature) -> Option<Feature>,
    {
        let mut writer = self.writer()?;
        while writer.has_next()? {
            let feature = writer.next()?;
            if !predicate(feature) {
                continue;
            }
            match mapper(feature.clone()) {
                Some(replacement) => writer.replace_current(replacement)?,
                None => writer.remove()?,
            }
        }
        writer.close()
    }

    /// Deletes the file and starts over with a header for `feature_type`.
    pub fn update_schema(&self, feature_type: FeatureType) -> Result<Arc<FeatureType>, Error> {
        let feature_type = Arc::new(feature_type);
        let _staging = self.staging_lock.exclusive()?;
        let exclusive = self.lock.exclusive()?;

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(&self.path, err)),
        }
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&self.path)
            .map_err(|err| io_error(&self.path, err))?;
        let header = encode_header(&feature_type, self.separator);
        file.write_all(header.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .and_then(|()| file.sync_all())
            .map_err(|err| io_error(&self.path, err))?;
        *self.cache()? = Some(Arc::clone(&feature_type));
        drop(exclusive);

        info!(
            path = %self.path.display(),
            attributes = feature_type.len(),
            "schema replaced"
        );
        self.listeners.schema_replaced(&feature_type);
        Ok(feature_type)
    }

    /// Number of data records, counted from the raw text without decoding values.
    pub fn count(&self) -> Result<u64, Error> {
        let _guard = self.lock.shared()?;
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(io_error(&self.path, err)),
        };
        let records = count_records(BufReader::new(file), self.separator)
            .map_err(|err| io_error(&self.path, err))?;
        Ok(records.saturating_sub(1))
    }

    /// Number of features matching `predicate`; decodes every record.
    pub fn count_where<P>(&self, mut predicate: P) -> Result<u64, Error>
    where
        P: FnMut(&Feature) -> bool,
    {
        let mut count = 0u64;
        for feature in self.features()? {
            if predicate(&feature?) {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.add(listener);
    }

    /// Files currently backing the store: the data file plus any sidecar files.
    pub fn component_files(&self) -> Vec<PathBuf> {
        [
            self.path.clone(),
            self.lock.path().to_path_buf(),
            staging_path(&self.path),
            self.staging_lock.path().to_path_buf(),
        ]
        .into_iter()
        .filter(|path| path.exists())
        .collect()
    }

    fn require_schema(&self) -> Result<Arc<FeatureType>, Error> {
        self.schema()?.ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("store has no schema")
                .with_path(&self.path)
                .with_hint("Open the store with a schema or call update_schema() first.")
        })
    }

    fn read_header(&self) -> Result<Option<Arc<FeatureType>>, Error> {
        let _guard = self.lock.shared()?;
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&self.path, err)),
        };
        let mut tokenizer = LineTokenizer::new(BufReader::new(file), self.separator);
        let feature_type =
            read_schema(&mut tokenizer, &self.name).map_err(|err| err.with_path(&self.path))?;
        Ok(feature_type.map(Arc::new))
    }

    fn cache(&self) -> Result<MutexGuard<'_, Option<Arc<FeatureType>>>, Error> {
        self.schema.lock().map_err(|_| {
            Error::new(ErrorKind::Internal).with_message("schema cache lock poisoned")
        })
    }
}
