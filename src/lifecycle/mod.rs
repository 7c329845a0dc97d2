//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Session end (shutdown.rs):
//!     Exhaustion | source drained | signal → SessionControl::finish
//!     → owner stops intake → final report flush → SessionSummary
//!
//! Signals (signals.rs):
//!     SIGINT → SessionEnd::Interrupted
//! ```
//!
//! # Design Decisions
//! - Ending a session is an event, never a process exit
//! - The report is always flushed before the owner returns

pub mod shutdown;
pub mod signals;

pub use shutdown::{SessionControl, SessionEnd, SessionMode, SessionSummary};
