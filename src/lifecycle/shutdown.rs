//! Session end coordination.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// Every recorded exchange was consumed.
    Exhausted,
    /// The packet source ran out of packets.
    SourceDrained,
    /// Ctrl+C or another external stop request.
    Interrupted,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionEnd::Exhausted => "corpus exhausted",
            SessionEnd::SourceDrained => "capture source drained",
            SessionEnd::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Shared handle signalling the end of a session.
///
/// The first reason reported wins; later calls are ignored.
#[derive(Debug, Clone)]
pub struct SessionControl {
    tx: Arc<watch::Sender<Option<SessionEnd>>>,
}

impl SessionControl {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record the end reason. Returns true if this call ended the session.
    pub fn finish(&self, reason: SessionEnd) -> bool {
        let ended = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if ended {
            tracing::info!(%reason, "Session ending");
        }
        ended
    }

    pub fn ended(&self) -> Option<SessionEnd> {
        *self.tx.borrow()
    }

    /// Wait until the session ends.
    pub async fn wait(&self) -> SessionEnd {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return SessionEnd::Interrupted;
            }
        }
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a capture or replay session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub mode: SessionMode,
    pub end: SessionEnd,
    /// Exchanges written to a new corpus.
    pub recorded: usize,
    pub passed: usize,
    pub failed: usize,
    /// Recorded exchanges never consumed.
    pub unreached: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Record,
    Compare,
    Replay,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_reason_wins() {
        let control = SessionControl::new();
        assert!(control.ended().is_none());

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait().await })
        };

        assert!(control.finish(SessionEnd::Exhausted));
        assert!(!control.finish(SessionEnd::Interrupted));
        assert_eq!(waiter.await.unwrap(), SessionEnd::Exhausted);
        assert_eq!(control.ended(), Some(SessionEnd::Exhausted));
    }

    #[tokio::test]
    async fn test_wait_after_end_returns_immediately() {
        let control = SessionControl::new();
        control.finish(SessionEnd::SourceDrained);
        assert_eq!(control.wait().await, SessionEnd::SourceDrained);
    }
}
