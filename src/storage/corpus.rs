//! Per-application corpus persistence.
//!
//! # Layout
//! ```text
//! <corpus_dir>/<app>/
//!     packets.json        JSON array of projected exchanges, capture order
//!     http.pcap           raw frames of every recorded exchange
//!     diff/<session>/     one archive per comparison or replay session
//! ```
//!
//! Older corpora keep one JSON document per exchange directly under
//! `<app>/`; those are still loaded, ordered by file name.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::capture::packet::RawPacket;
use crate::storage::archive::SessionArchive;
use crate::storage::trace::{TraceError, TraceWriter};

pub const CORPUS_FILE: &str = "packets.json";
pub const TRACE_FILE: &str = "http.pcap";
pub const ARCHIVE_DIR: &str = "diff";

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} does not hold a JSON array")]
    NotAnArray(PathBuf),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("invalid application name '{0}'")]
    InvalidName(String),
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CorpusError + '_ {
    move |source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Stores corpora under one root directory.
///
/// Writes through one store are serialized; a single engine instance is
/// expected to own a corpus for the length of a session.
pub struct CorpusStore {
    root: PathBuf,
    write_lock: Mutex<()>,
    traces: Mutex<HashMap<PathBuf, TraceWriter>>,
}

impl CorpusStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
            traces: Mutex::new(HashMap::new()),
        }
    }

    pub fn app_dir(&self, app: &str) -> Result<PathBuf, CorpusError> {
        let valid = !app.is_empty()
            && app != "."
            && app != ".."
            && !app.contains(['/', '\\'])
            && !app.chars().any(char::is_control);
        if valid {
            Ok(self.root.join(app))
        } else {
            Err(CorpusError::InvalidName(app.to_string()))
        }
    }

    /// A corpus counts as recorded as soon as its directory exists.
    pub fn exists(&self, app: &str) -> bool {
        self.app_dir(app).map(|dir| dir.is_dir()).unwrap_or(false)
    }

    /// Create an empty corpus.
    pub fn create(&self, app: &str) -> Result<(), CorpusError> {
        let dir = self.app_dir(app)?;
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        let file = dir.join(CORPUS_FILE);
        if !file.exists() {
            write_array(&file, &[])?;
        }
        tracing::info!(app, dir = %dir.display(), "Created corpus");
        Ok(())
    }

    /// Append one exchange document and its frames.
    pub fn save(&self, app: &str, exchange: &Value, packets: &[RawPacket]) -> Result<(), CorpusError> {
        let dir = self.app_dir(app)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        let count = append_document(&dir.join(CORPUS_FILE), exchange)?;
        self.append_trace(&dir.join(TRACE_FILE), packets)?;

        tracing::debug!(app, count, packets = packets.len(), "Saved exchange");
        Ok(())
    }

    /// Exchange documents in capture order.
    pub fn load(&self, app: &str) -> Result<Vec<Value>, CorpusError> {
        let dir = self.app_dir(app)?;
        let file = dir.join(CORPUS_FILE);
        if file.exists() {
            return read_array(&file);
        }
        load_legacy(&dir)
    }

    /// Start a session archive under `<app>/diff/`.
    pub fn open_archive(&self, app: &str) -> Result<SessionArchive, CorpusError> {
        let dir = self.app_dir(app)?;
        SessionArchive::create(&dir.join(ARCHIVE_DIR))
    }

    /// Remove one corpus. Returns false when there was nothing to remove.
    pub fn clear(&self, app: &str) -> Result<bool, CorpusError> {
        let dir = self.app_dir(app)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.traces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|path, _| !path.starts_with(&dir));

        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(app, "Cleared corpus");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir)(e)),
        }
    }

    /// Remove every corpus under the root. Returns the names removed.
    pub fn clear_all(&self) -> Result<Vec<String>, CorpusError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root)(e)),
        };

        let mut apps = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(&self.root))?;
            if entry.path().is_dir() {
                apps.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        apps.sort();

        let mut removed = Vec::new();
        for app in apps {
            if self.clear(&app)? {
                removed.push(app);
            }
        }
        Ok(removed)
    }

    fn append_trace(&self, path: &Path, packets: &[RawPacket]) -> Result<(), CorpusError> {
        let Some(first) = packets.first() else {
            return Ok(());
        };
        let mut traces = self.traces.lock().unwrap_or_else(|e| e.into_inner());
        let writer = match traces.entry(path.to_path_buf()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(TraceWriter::open(path, first.link_type)?)
            }
        };
        writer.append(packets)?;
        Ok(())
    }
}

pub(crate) fn read_array(path: &Path) -> Result<Vec<Value>, CorpusError> {
    let content = fs::read_to_string(path).map_err(io_error(path))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str(&content) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(CorpusError::NotAnArray(path.to_path_buf())),
        Err(source) => Err(CorpusError::Json {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Replace `path` atomically with `items` as a pretty-printed array.
pub(crate) fn write_array(path: &Path, items: &[Value]) -> Result<(), CorpusError> {
    let content = serde_json::to_string_pretty(items).map_err(|source| CorpusError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))
}

/// Append one document, returning the new length.
pub(crate) fn append_document(path: &Path, document: &Value) -> Result<usize, CorpusError> {
    let mut items = if path.exists() { read_array(path)? } else { Vec::new() };
    items.push(document.clone());
    write_array(path, &items)?;
    Ok(items.len())
}

fn load_legacy(dir: &Path) -> Result<Vec<Value>, CorpusError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(dir)(e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(io_error(dir))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let content = fs::read_to_string(&path).map_err(io_error(&path))?;
        let document = serde_json::from_str(&content).map_err(|source| CorpusError::Json {
            path: path.clone(),
            source,
        })?;
        documents.push(document);
    }
    if !documents.is_empty() {
        tracing::info!(dir = %dir.display(), count = documents.len(), "Loaded legacy per-file corpus");
    }
    Ok(documents)
}
