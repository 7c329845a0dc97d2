//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::matching::MatchMode;

/// Root configuration for the record/diff/replay engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Packet capture settings.
    pub capture: CaptureConfig,

    /// Corpus and schema locations.
    pub storage: StorageConfig,

    /// Replay server listener.
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    pub matching: MatchingConfig,

    /// Test report output.
    pub report: ReportConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Packet capture configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// TCP port whose traffic is observed.
    pub port: u16,

    /// Network interface for live capture.
    pub interface: Option<String>,

    /// Capture file to read instead of a live interface.
    pub pcap_file: Option<PathBuf>,

    /// Maximum bytes captured per frame (live capture only).
    pub snaplen: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            port: 80,
            interface: None,
            pcap_file: None,
            snaplen: 65535,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one corpus directory per application.
    pub corpus_dir: PathBuf,

    /// Directory holding `<app>.json` schema files.
    pub schema_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from("resources/http"),
            schema_dir: PathBuf::from("schema"),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:80").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:80".to_string(),
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-request timeout of the replay server in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MatchingConfig {
    /// `lookup` pairs by method and path; `ordered` compares in capture order.
    pub mode: MatchMode,
}

/// Report configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Well-known path the report is written to.
    pub path: PathBuf,

    /// `name` attribute of the test suite.
    pub suite_name: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("junit_report.xml"),
            suite_name: "HTTP Request Comparison".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
