//! Corpus persistence: exchange documents, raw traces and session archives.

pub mod archive;
pub mod corpus;
pub mod trace;

pub use archive::SessionArchive;
pub use corpus::{CorpusError, CorpusStore};
pub use trace::{TraceError, TraceWriter};
