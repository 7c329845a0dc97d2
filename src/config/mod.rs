//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → CLI overrides applied in main
//!     → shared by reference with each session
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a session starts
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    CaptureConfig, EngineConfig, ListenerConfig, LogFormat, MatchingConfig, ObservabilityConfig, ReportConfig,
    StorageConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
