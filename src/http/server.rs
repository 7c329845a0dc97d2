//! Replay server setup and request handling.
//!
//! # Responsibilities
//! - Create the Axum router answering any method and path
//! - Match each request against the recorded corpus (at most once per entry)
//! - Serve the recorded response, or a 404 when nothing matches
//! - Record verdicts in the session report and archive served traffic
//! - Stop accepting requests once the corpus is exhausted
//!
//! # Design Decisions
//! - Persistence runs on the blocking pool before the response is returned,
//!   so graceful shutdown drains it together with in-flight requests
//! - The report is flushed after every request and once more on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::capture::packet::build_segments;
use crate::capture::RawPacket;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::exchange::{headers, Body as StoredBody, Exchange, Headers, HttpResponseRecord};
use crate::http::request::incoming_exchange;
use crate::http::response::{no_match_response, replay_response};
use crate::lifecycle::{SessionControl, SessionEnd, SessionMode, SessionSummary};
use crate::matching::{Matcher, Verdict};
use crate::observability::metrics;
use crate::projection::Schema;
use crate::report::ReportGenerator;
use crate::storage::{CorpusStore, SessionArchive};

/// Initial sequence number of synthesized TCP segments.
const SYNTHETIC_SEQ: u32 = 1;

/// Per-session replay state shared by all handlers.
struct Replay {
    matcher: Matcher,
    report: ReportGenerator,
    archive: SessionArchive,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    replay: Arc<Replay>,
    control: SessionControl,
    local_addr: SocketAddr,
    max_body_size: usize,
}

/// HTTP server answering requests from a recorded corpus.
pub struct ReplayServer {
    app: String,
    config: EngineConfig,
    replay: Arc<Replay>,
    control: SessionControl,
}

impl ReplayServer {
    /// Load the corpus for `app` and open a new session archive.
    pub fn new(config: EngineConfig, app: impl Into<String>) -> Result<Self, EngineError> {
        let app = app.into();
        let store = CorpusStore::new(&config.storage.corpus_dir);
        if !store.exists(&app) {
            return Err(EngineError::CorpusMissing(app));
        }

        let corpus = store.load(&app)?;
        let schema = Schema::load(&config.storage.schema_dir, &app);
        let archive = store.open_archive(&app)?;
        let report = ReportGenerator::new(
            &config.report.suite_name,
            vec![config.report.path.clone(), archive.report_path()],
        );
        let matcher = Matcher::new(corpus, schema, config.matching.mode);

        tracing::info!(
            app = %app,
            exchanges = matcher.corpus_len(),
            archive = %archive.dir().display(),
            "Replay corpus loaded"
        );

        Ok(Self {
            app,
            config,
            replay: Arc::new(Replay {
                matcher,
                report,
                archive,
            }),
            control: SessionControl::new(),
        })
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self, local_addr: SocketAddr) -> Router {
        let state = AppState {
            replay: Arc::clone(&self.replay),
            control: self.control.clone(),
            local_addr,
            max_body_size: self.config.listener.max_body_size,
        };

        Router::new()
            .route("/{*path}", any(replay_handler))
            .route("/", any(replay_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs))),
            )
    }

    /// Serve until the corpus is exhausted or the session is stopped.
    pub async fn run(self, listener: TcpListener) -> Result<SessionSummary, EngineError> {
        let session_id = Uuid::new_v4().to_string();
        let addr = listener.local_addr()?;

        if self.replay.matcher.is_exhausted() {
            tracing::warn!(app = %self.app, "Recorded corpus is empty, nothing to replay");
            self.control.finish(SessionEnd::Exhausted);
        } else {
            tracing::info!(session_id = %session_id, app = %self.app, address = %addr, "Replay server starting");

            let service = self.router(addr).into_make_service_with_connect_info::<SocketAddr>();
            let control = self.control.clone();
            axum::serve(listener, service)
                .with_graceful_shutdown(async move {
                    control.wait().await;
                })
                .await?;
        }

        let replay = Arc::clone(&self.replay);
        tokio::task::spawn_blocking(move || replay.report.flush(&replay.matcher.remaining())).await??;

        let tally = self.replay.report.tally();
        let summary = SessionSummary {
            session_id,
            mode: SessionMode::Replay,
            end: self.control.ended().unwrap_or(SessionEnd::Interrupted),
            recorded: 0,
            passed: tally.passed,
            failed: tally.failed,
            unreached: self.replay.matcher.remaining_len(),
        };
        tracing::info!(
            session_id = %summary.session_id,
            end = %summary.end,
            passed = summary.passed,
            failed = summary.failed,
            unreached = summary.unreached,
            "Replay server stopped"
        );
        Ok(summary)
    }
}

/// Answer one request from the corpus.
async fn replay_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "Request body rejected");
            metrics::record_request(StatusCode::PAYLOAD_TOO_LARGE.as_u16(), start_time);
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let mut exchange = incoming_exchange(&parts, &body, peer, state.local_addr);
    tracing::debug!(%peer, key = %exchange.key(), "Replaying request");

    let outcome = state.replay.matcher.match_exchange(&exchange);
    state.replay.report.record(&outcome.verdict);

    let (response, served) = match &outcome.verdict {
        Verdict::NoMatch { .. } => {
            tracing::warn!(%peer, key = %exchange.key(), "No matching recorded request");
            (no_match_response(), no_match_record())
        }
        verdict => {
            let recorded = verdict.recorded_response().unwrap_or_default();
            (replay_response(&recorded), recorded)
        }
    };
    exchange.response = Some(HttpResponseRecord {
        source_ip: state.local_addr.ip().to_string(),
        destination_ip: peer.ip().to_string(),
        source_port: state.local_addr.port(),
        destination_port: peer.port(),
        ..served
    });

    let replay = Arc::clone(&state.replay);
    let local_addr = state.local_addr;
    let persisted = tokio::task::spawn_blocking(move || persist(&replay, &exchange, peer, local_addr)).await;
    match persisted {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Failed to persist replayed exchange"),
        Err(e) => tracing::error!(error = %e, "Persistence task failed"),
    }

    if outcome.exhausted {
        state.control.finish(SessionEnd::Exhausted);
    }

    metrics::record_request(response.status().as_u16(), start_time);
    response
}

fn persist(replay: &Replay, exchange: &Exchange, peer: SocketAddr, local: SocketAddr) -> Result<(), EngineError> {
    let packets = synthesize_packets(exchange, peer, local);
    replay.archive.record(&exchange.to_value(), &packets)?;
    replay.report.flush(&replay.matcher.remaining())?;
    Ok(())
}

/// Ethernet frames carrying the request and the served response.
fn synthesize_packets(exchange: &Exchange, peer: SocketAddr, local: SocketAddr) -> Vec<RawPacket> {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();

    let (mut frames, _) = build_segments(peer, local, SYNTHETIC_SEQ, &exchange.request.to_wire(), false);
    if let Some(response) = &exchange.response {
        let (response_frames, _) = build_segments(local, peer, SYNTHETIC_SEQ, &response.to_wire(), true);
        frames.extend(response_frames);
    }
    frames.into_iter().map(|frame| RawPacket::ethernet(timestamp, frame)).collect()
}

/// Archived form of the 404 served for unmatched requests.
fn no_match_record() -> HttpResponseRecord {
    let mut response_headers = Headers::new();
    headers::insert(&mut response_headers, "content-type", "application/json");
    HttpResponseRecord {
        status_code: StatusCode::NOT_FOUND.as_u16(),
        reason_phrase: "Not Found".to_string(),
        headers: response_headers,
        body: Some(StoredBody::Text(r#"{"error":"No matching packet found"}"#.to_string())),
        ..Default::default()
    }
}
