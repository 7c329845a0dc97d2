//! Session-scoped archives.
//!
//! Each comparison or replay session writes what it observed (or served)
//! into its own directory, next to a copy of the session report.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use uuid::Uuid;

use crate::capture::packet::RawPacket;
use crate::storage::corpus::{append_document, io_error, CorpusError, CORPUS_FILE, TRACE_FILE};
use crate::storage::trace::TraceWriter;

pub const REPORT_FILE: &str = "junit_report.xml";

#[derive(Debug)]
pub struct SessionArchive {
    dir: PathBuf,
    trace: Mutex<Option<TraceWriter>>,
}

impl SessionArchive {
    /// Create a fresh session directory under `parent`.
    pub fn create(parent: &Path) -> Result<Self, CorpusError> {
        let session = Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{}",
            chrono::Local::now().format("%Y%m%d-%H%M%S"),
            &session[..8]
        );
        let dir = parent.join(name);
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        tracing::info!(dir = %dir.display(), "Session archive created");
        Ok(Self {
            dir,
            trace: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(REPORT_FILE)
    }

    /// Archive one observed or served exchange.
    pub fn record(&self, exchange: &Value, packets: &[RawPacket]) -> Result<(), CorpusError> {
        let mut trace = self.trace.lock().unwrap_or_else(|e| e.into_inner());
        append_document(&self.dir.join(CORPUS_FILE), exchange)?;

        let Some(first) = packets.first() else {
            return Ok(());
        };
        if trace.is_none() {
            *trace = Some(TraceWriter::open(&self.dir.join(TRACE_FILE), first.link_type)?);
        }
        if let Some(writer) = trace.as_mut() {
            writer.append(packets)?;
        }
        Ok(())
    }
}
