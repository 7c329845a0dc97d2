//! OS signal handling.
//!
//! # Responsibilities
//! - Register the Ctrl+C handler
//! - Translate it into a session end
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - The report is flushed by the session owner, not here

use crate::lifecycle::shutdown::{SessionControl, SessionEnd};

/// End the session on Ctrl+C.
pub fn spawn_interrupt_handler(control: SessionControl) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                control.finish(SessionEnd::Interrupted);
            }
            Err(e) => tracing::error!(error = %e, "Failed to install Ctrl+C handler"),
        }
    })
}
