//! JUnit-style comparison report.
//!
//! # Responsibilities
//! - Accumulate one test case per verdict, in verdict order
//! - Render unconsumed corpus entries as failures at flush time
//! - Write the document to every target path
//!
//! # Design Decisions
//! - Matched entries are numbered `Request N`; a live request with no
//!   recorded counterpart takes the next number as `Alleged request N`
//!   without consuming it
//! - Flushing never mutates accumulated entries, so it can run after every
//!   verdict and again at session end

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::matching::Verdict;
use crate::report::xml::Element;

pub const MSG_MISMATCH: &str = "Request did not match";
pub const MSG_NO_MATCH: &str = "No matching request found";
pub const MSG_UNREACHED: &str = "Automation did not reach this request";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One test case.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub name: String,
    pub outcome: EntryOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Success,
    Failure {
        message: &'static str,
        original: Option<Value>,
        new: Option<Value>,
        diff: Option<Value>,
    },
}

impl ReportEntry {
    fn to_element(&self) -> Element {
        let testcase = Element::new("testcase").attr("name", &self.name);
        match &self.outcome {
            EntryOutcome::Success => testcase.child(Element::new("success")),
            EntryOutcome::Failure {
                message,
                original,
                new,
                diff,
            } => {
                let mut failure = Element::new("failure").attr("message", message);
                for (name, value) in [("original", original), ("new", new), ("diff", diff)] {
                    if let Some(value) = value {
                        failure.push(Element::from_json(name, value));
                    }
                }
                testcase.child(failure)
            }
        }
    }
}

/// Passed and failed counts so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct ReportState {
    entries: Vec<ReportEntry>,
    /// Recorded entries consumed so far.
    matched: usize,
}

#[derive(Debug)]
pub struct ReportGenerator {
    suite_name: String,
    state: Mutex<ReportState>,
    targets: Vec<PathBuf>,
    write_lock: Mutex<()>,
}

impl ReportGenerator {
    pub fn new(suite_name: impl Into<String>, targets: Vec<PathBuf>) -> Self {
        Self {
            suite_name: suite_name.into(),
            state: Mutex::new(ReportState::default()),
            targets,
            write_lock: Mutex::new(()),
        }
    }

    pub fn record(&self, verdict: &Verdict) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let number = state.matched + 1;
        let entry = match verdict {
            Verdict::Success { .. } => {
                state.matched += 1;
                ReportEntry {
                    name: format!("Request {number}"),
                    outcome: EntryOutcome::Success,
                }
            }
            Verdict::Failure {
                original, new, diff, ..
            } => {
                state.matched += 1;
                ReportEntry {
                    name: format!("Request {number}"),
                    outcome: EntryOutcome::Failure {
                        message: MSG_MISMATCH,
                        original: Some(original.clone()),
                        new: Some(new.clone()),
                        diff: Some(diff.to_value()),
                    },
                }
            }
            Verdict::NoMatch { incoming } => ReportEntry {
                name: format!("Alleged request {number}"),
                outcome: EntryOutcome::Failure {
                    message: MSG_NO_MATCH,
                    original: None,
                    new: Some(incoming.get("request").cloned().unwrap_or_else(|| incoming.clone())),
                    diff: None,
                },
            },
        };
        state.entries.push(entry);
    }

    pub fn entries(&self) -> Vec<ReportEntry> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).entries.clone()
    }

    pub fn tally(&self) -> Tally {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let passed = state
            .entries
            .iter()
            .filter(|e| e.outcome == EntryOutcome::Success)
            .count();
        Tally {
            passed,
            failed: state.entries.len() - passed,
        }
    }

    /// Render the report with `unreached` corpus entries appended as failures.
    pub fn render(&self, unreached: &[Value]) -> String {
        let (mut entries, matched) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.entries.clone(), state.matched)
        };

        for (i, recorded) in unreached.iter().enumerate() {
            entries.push(ReportEntry {
                name: format!("Request {}", matched + i + 1),
                outcome: EntryOutcome::Failure {
                    message: MSG_UNREACHED,
                    original: Some(recorded.get("request").cloned().unwrap_or_else(|| recorded.clone())),
                    new: None,
                    diff: None,
                },
            });
        }

        let failures = entries
            .iter()
            .filter(|e| e.outcome != EntryOutcome::Success)
            .count();
        let suite = Element::new("testsuite")
            .attr("name", &self.suite_name)
            .attr("tests", entries.len())
            .attr("failures", failures);
        entries
            .iter()
            .fold(suite, |suite, entry| suite.child(entry.to_element()))
            .to_document()
    }

    /// Write the current report to every target.
    ///
    /// Rendering happens under the write lock, so a flush can never overwrite
    /// the targets with a snapshot older than the one already written.
    pub fn flush(&self, unreached: &[Value]) -> Result<(), ReportError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let document = self.render(unreached);
        for target in &self.targets {
            write_file(target, &document)?;
        }
        tracing::debug!(targets = self.targets.len(), unreached = unreached.len(), "Report written");
        Ok(())
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), ReportError> {
    let err = |source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(err)?;
    }
    fs::write(path, content).map_err(err)
}
