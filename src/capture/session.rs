//! Capture sessions: record a new corpus or compare against an existing one.
//!
//! # Data Flow
//! ```text
//! PacketSource ──(blocking reader)──▶ StreamReconstructor
//!     ──mpsc──▶ record:  Schema::project → CorpusStore::save
//!            ▶ compare: Matcher → ReportGenerator → SessionArchive
//! ```
//!
//! The session records when no corpus exists for the application and
//! compares otherwise. Comparison stops as soon as the corpus is exhausted.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::capture::source::{NextPacket, PacketSource, SourceError};
use crate::capture::stream::{CompletedExchange, StreamReconstructor};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::lifecycle::{SessionControl, SessionEnd, SessionMode, SessionSummary};
use crate::matching::Matcher;
use crate::projection::Schema;
use crate::report::ReportGenerator;
use crate::storage::{CorpusStore, SessionArchive};

/// Completed exchanges buffered between the reader and the sink.
const CHANNEL_CAPACITY: usize = 256;

struct Comparison {
    matcher: Matcher,
    report: ReportGenerator,
    archive: SessionArchive,
}

impl Comparison {
    /// Match, report and archive one exchange; returns true once exhausted.
    fn handle(&self, completed: CompletedExchange) -> Result<bool, EngineError> {
        let outcome = self.matcher.match_exchange(&completed.exchange);
        self.report.record(&outcome.verdict);
        self.archive.record(&completed.exchange.to_value(), &completed.packets)?;
        self.report.flush(&self.matcher.remaining())?;
        Ok(outcome.exhausted)
    }
}

enum Sink {
    Record { store: Arc<CorpusStore>, schema: Schema },
    Compare(Arc<Comparison>),
}

pub struct CaptureSession {
    app: String,
    config: EngineConfig,
    store: Arc<CorpusStore>,
    control: SessionControl,
}

impl CaptureSession {
    pub fn new(config: EngineConfig, app: impl Into<String>) -> Self {
        let store = Arc::new(CorpusStore::new(&config.storage.corpus_dir));
        Self {
            app: app.into(),
            config,
            store,
            control: SessionControl::new(),
        }
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    /// Mode the session will run in, decided by corpus presence.
    pub fn mode(&self) -> SessionMode {
        if self.store.exists(&self.app) {
            SessionMode::Compare
        } else {
            SessionMode::Record
        }
    }

    pub async fn run(self, source: Box<dyn PacketSource>) -> Result<SessionSummary, EngineError> {
        let session_id = Uuid::new_v4().to_string();
        let mode = self.mode();
        let schema = Schema::load(&self.config.storage.schema_dir, &self.app);

        let sink = match mode {
            SessionMode::Compare => {
                let corpus = self.store.load(&self.app)?;
                let archive = self.store.open_archive(&self.app)?;
                let report = ReportGenerator::new(
                    &self.config.report.suite_name,
                    vec![self.config.report.path.clone(), archive.report_path()],
                );
                let matcher = Matcher::new(corpus, schema, self.config.matching.mode);
                Sink::Compare(Arc::new(Comparison {
                    matcher,
                    report,
                    archive,
                }))
            }
            _ => {
                self.store.create(&self.app)?;
                Sink::Record {
                    store: Arc::clone(&self.store),
                    schema,
                }
            }
        };

        tracing::info!(
            session_id = %session_id,
            app = %self.app,
            ?mode,
            port = self.config.capture.port,
            "Capture session starting"
        );

        if let Sink::Compare(comparison) = &sink {
            if comparison.matcher.is_exhausted() {
                tracing::warn!(app = %self.app, "Recorded corpus is empty, nothing to compare");
                self.control.finish(SessionEnd::Exhausted);
                comparison.report.flush(&[])?;
                return Ok(self.summary(session_id, mode, SessionEnd::Exhausted, 0, &sink));
            }
        }

        let reconstructor = Arc::new(StreamReconstructor::new(self.config.capture.port));
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let reader = {
            let reconstructor = Arc::clone(&reconstructor);
            let control = self.control.clone();
            tokio::task::spawn_blocking(move || read_packets(source, &reconstructor, &tx, &control))
        };

        let mut recorded = 0;
        let end = loop {
            tokio::select! {
                biased;
                item = rx.recv() => match item {
                    Some(completed) => {
                        if self.handle(&sink, completed).await? {
                            self.control.finish(SessionEnd::Exhausted);
                            break SessionEnd::Exhausted;
                        }
                        if matches!(sink, Sink::Record { .. }) {
                            recorded += 1;
                        }
                    }
                    None => {
                        self.control.finish(SessionEnd::SourceDrained);
                        break SessionEnd::SourceDrained;
                    }
                },
                reason = self.control.wait() => break reason,
            }
        };
        drop(rx);

        if end == SessionEnd::SourceDrained {
            match reader.await? {
                Ok(packets) => tracing::debug!(packets, "Packet source drained"),
                Err(e) => tracing::error!(error = %e, "Packet source failed, ending capture"),
            }
        }
        let discarded = reconstructor.finish();
        if discarded > 0 {
            tracing::info!(discarded, "Discarded incomplete exchanges");
        }

        if let Sink::Compare(comparison) = &sink {
            let comparison = Arc::clone(comparison);
            tokio::task::spawn_blocking(move || comparison.report.flush(&comparison.matcher.remaining())).await??;
        }

        let summary = self.summary(session_id, mode, end, recorded, &sink);
        tracing::info!(
            session_id = %summary.session_id,
            end = %summary.end,
            recorded = summary.recorded,
            passed = summary.passed,
            failed = summary.failed,
            unreached = summary.unreached,
            "Capture session finished"
        );
        Ok(summary)
    }

    async fn handle(&self, sink: &Sink, completed: CompletedExchange) -> Result<bool, EngineError> {
        match sink {
            Sink::Record { store, schema } => {
                let document = schema.project(&completed.exchange.to_value());
                let store = Arc::clone(store);
                let app = self.app.clone();
                tokio::task::spawn_blocking(move || store.save(&app, &document, &completed.packets)).await??;
                Ok(false)
            }
            Sink::Compare(comparison) => {
                let comparison = Arc::clone(comparison);
                tokio::task::spawn_blocking(move || comparison.handle(completed)).await?
            }
        }
    }

    fn summary(
        &self,
        session_id: String,
        mode: SessionMode,
        end: SessionEnd,
        recorded: usize,
        sink: &Sink,
    ) -> SessionSummary {
        let (passed, failed, unreached) = match sink {
            Sink::Compare(comparison) => {
                let tally = comparison.report.tally();
                (tally.passed, tally.failed, comparison.matcher.remaining_len())
            }
            Sink::Record { .. } => (0, 0, 0),
        };
        SessionSummary {
            session_id,
            mode,
            end,
            recorded,
            passed,
            failed,
            unreached,
        }
    }
}

/// Pull packets until the source drains, the session ends or the sink
/// goes away. Returns the number of packets read.
///
/// The session state is rechecked after every read, idle polls included, so
/// a quiet live interface cannot keep this thread alive past the session.
fn read_packets(
    mut source: Box<dyn PacketSource>,
    reconstructor: &StreamReconstructor,
    tx: &mpsc::Sender<CompletedExchange>,
    control: &SessionControl,
) -> Result<usize, SourceError> {
    let mut count = 0;
    while control.ended().is_none() {
        let packet = match source.next_packet()? {
            NextPacket::Packet(packet) => packet,
            NextPacket::Idle => continue,
            NextPacket::Drained => break,
        };
        count += 1;
        if let Some(completed) = reconstructor.process(packet) {
            if tx.blocking_send(completed).is_err() {
                break;
            }
        }
    }
    Ok(count)
}
