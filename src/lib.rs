//! HTTP traffic record, diff and replay engine.

// Capture and data model
pub mod capture;
pub mod exchange;
pub mod projection;

// Persistence and comparison
pub mod matching;
pub mod report;
pub mod storage;

// Replay
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use capture::CaptureSession;
pub use config::EngineConfig;
pub use error::EngineError;
pub use http::ReplayServer;
pub use lifecycle::{SessionControl, SessionEnd, SessionSummary};
