//! Matching subsystem.
//!
//! # Data Flow
//! ```text
//! Observed Exchange (method, path, ...)
//!     → matcher.rs (find and consume recorded entry)
//!     → projection (schema applied to both sides)
//!     → Verdict: Success | Failure(diff) | NoMatch
//! ```
//!
//! # Design Decisions
//! - Each recorded entry is consumed at most once per session
//! - Deterministic: the first unconsumed entry with the key wins
//! - A missing entry is a verdict, never an error

pub mod matcher;

pub use matcher::{MatchMode, MatchOutcome, Matcher, Verdict};
