//! Pairing observed exchanges with recorded ones.
//!
//! # Responsibilities
//! - Find the recorded counterpart of an observed exchange
//! - Consume it from the working copy at most once
//! - Compare the projected forms and produce a verdict
//!
//! # Design Decisions
//! - The working copy is an in-memory clone; the persisted corpus is never
//!   touched
//! - Find-and-remove runs under one mutex so concurrent requests for the
//!   same key cannot consume the same entry
//! - Exhaustion is reported on the outcome, callers decide what it ends

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchange::{self, Exchange, HttpResponseRecord, MatchKey};
use crate::observability::metrics;
use crate::projection::{self, Diff, Schema};

/// How an observed exchange selects its recorded counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// First unconsumed entry with the same method and path.
    #[default]
    Lookup,
    /// Next unconsumed entry in capture order, whatever its key.
    Ordered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Success {
        recorded: Value,
    },
    Failure {
        recorded: Value,
        /// Projected recorded exchange.
        original: Value,
        /// Projected observed exchange.
        new: Value,
        diff: Diff,
    },
    NoMatch {
        incoming: Value,
    },
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Success { .. } => "success",
            Verdict::Failure { .. } => "failure",
            Verdict::NoMatch { .. } => "no_match",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success { .. })
    }

    /// The recorded exchange this verdict consumed, if any.
    pub fn recorded(&self) -> Option<&Value> {
        match self {
            Verdict::Success { recorded } | Verdict::Failure { recorded, .. } => Some(recorded),
            Verdict::NoMatch { .. } => None,
        }
    }

    /// Response to serve for this verdict.
    pub fn recorded_response(&self) -> Option<HttpResponseRecord> {
        self.recorded().and_then(exchange::response_from_value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub verdict: Verdict,
    /// The working copy is empty after this match.
    pub exhausted: bool,
}

pub struct Matcher {
    working: Mutex<VecDeque<Value>>,
    schema: Schema,
    mode: MatchMode,
    total: usize,
}

impl Matcher {
    pub fn new(corpus: Vec<Value>, schema: Schema, mode: MatchMode) -> Self {
        let total = corpus.len();
        tracing::debug!(entries = total, ?mode, "Matcher ready");
        Self {
            working: Mutex::new(corpus.into()),
            schema,
            mode,
            total,
        }
    }

    /// Size of the corpus this matcher started from.
    pub fn corpus_len(&self) -> usize {
        self.total
    }

    pub fn remaining_len(&self) -> usize {
        self.working.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_len() == 0
    }

    /// Entries never consumed, in corpus order.
    pub fn remaining(&self) -> Vec<Value> {
        self.working
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn match_exchange(&self, incoming: &Exchange) -> MatchOutcome {
        let key = incoming.key();
        let (recorded, exhausted) = {
            let mut working = self.working.lock().unwrap_or_else(|e| e.into_inner());
            let position = match self.mode {
                MatchMode::Lookup => working
                    .iter()
                    .position(|entry| MatchKey::from_value(entry).as_ref() == Some(&key)),
                MatchMode::Ordered => (!working.is_empty()).then_some(0),
            };
            let recorded = position.and_then(|i| working.remove(i));
            (recorded, working.is_empty())
        };

        let verdict = match recorded {
            None => {
                tracing::warn!(request = %key, "No matching recorded exchange");
                Verdict::NoMatch {
                    incoming: self.schema.project(&incoming.to_value()),
                }
            }
            Some(recorded) => self.compare(recorded, incoming),
        };

        metrics::record_verdict(verdict.label());
        tracing::info!(request = %key, verdict = verdict.label(), exhausted, "Exchange matched");
        MatchOutcome { verdict, exhausted }
    }

    fn compare(&self, recorded: Value, incoming: &Exchange) -> Verdict {
        let mut original = self.schema.project(&recorded);
        let mut new = self.schema.project(&incoming.to_value());

        // Served requests carry no response yet; compare requests only.
        if incoming.response.is_none() {
            for side in [&mut original, &mut new] {
                if let Value::Object(map) = side {
                    map.remove("response");
                }
            }
        }

        if original == new {
            return Verdict::Success { recorded };
        }

        let diff = projection::diff(&original, &new);
        tracing::debug!(fields = diff.len(), "Exchange differs from recording");
        Verdict::Failure {
            recorded,
            original,
            new,
            diff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Body, HttpRequestRecord};
    use serde_json::json;
    use std::sync::Arc;

    fn recorded(method: &str, path: &str, body: &str) -> Value {
        json!({
            "request": {"method": method, "path": path, "headers": {}},
            "response": {"status_code": 200, "reason_phrase": "OK", "headers": {}, "body": body}
        })
    }

    fn observed(method: &str, path: &str, body: Option<&str>) -> Exchange {
        let mut exchange = Exchange {
            request: HttpRequestRecord {
                method: method.into(),
                path: path.into(),
                ..Default::default()
            },
            response: None,
        };
        if let Some(body) = body {
            exchange.response = Some(HttpResponseRecord {
                body: Some(Body::Text(body.into())),
                ..Default::default()
            });
        }
        exchange
    }

    fn request_and_body_schema() -> Schema {
        serde_json::from_value(json!({
            "request": {"method": true, "path": true},
            "response": {"status_code": true, "body": true}
        }))
        .unwrap()
    }

    #[test]
    fn test_identical_exchange_succeeds() {
        let matcher = Matcher::new(
            vec![recorded("GET", "/status", "Running")],
            request_and_body_schema(),
            MatchMode::Lookup,
        );
        let outcome = matcher.match_exchange(&observed("GET", "/status", Some("Running")));
        assert!(outcome.verdict.is_success());
        assert!(outcome.exhausted);
    }

    #[test]
    fn test_changed_body_fails_with_diff() {
        let matcher = Matcher::new(
            vec![recorded("GET", "/status", "Running")],
            request_and_body_schema(),
            MatchMode::Lookup,
        );
        let outcome = matcher.match_exchange(&observed("GET", "/status", Some("Degraded")));
        match outcome.verdict {
            Verdict::Failure { diff, .. } => assert_eq!(
                diff.to_value(),
                json!({"response": {"body": {"original": "Running", "new": "Degraded"}}})
            ),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_absent_key_leaves_working_copy_untouched() {
        let matcher = Matcher::new(
            vec![recorded("GET", "/a", "x"), recorded("GET", "/b", "y")],
            Schema::include_all(),
            MatchMode::Lookup,
        );
        let outcome = matcher.match_exchange(&observed("POST", "/a", None));
        assert!(matches!(outcome.verdict, Verdict::NoMatch { .. }));
        assert!(!outcome.exhausted);
        assert_eq!(matcher.remaining_len(), 2);
    }

    #[test]
    fn test_lookup_ignores_order() {
        let matcher = Matcher::new(
            vec![recorded("GET", "/a", "x"), recorded("GET", "/b", "y")],
            request_and_body_schema(),
            MatchMode::Lookup,
        );
        assert!(matcher.match_exchange(&observed("GET", "/b", None)).verdict.is_success());
        let remaining = matcher.remaining();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["request"]["path"], "/a");
    }

    #[test]
    fn test_ordered_mode_compares_against_head() {
        let matcher = Matcher::new(
            vec![recorded("GET", "/a", "x"), recorded("GET", "/b", "y")],
            request_and_body_schema(),
            MatchMode::Ordered,
        );
        let outcome = matcher.match_exchange(&observed("GET", "/b", None));
        match outcome.verdict {
            Verdict::Failure { diff, .. } => {
                assert_eq!(diff.to_value(), json!({"request": {"path": {"original": "/a", "new": "/b"}}}))
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(matcher.remaining()[0]["request"]["path"], "/b");
    }

    #[test]
    fn test_served_request_gets_recorded_response() {
        let matcher = Matcher::new(
            vec![recorded("GET", "/status", "Running")],
            Schema::include_all(),
            MatchMode::Lookup,
        );
        let outcome = matcher.match_exchange(&observed("GET", "/status", None));
        let response = outcome.verdict.recorded_response().unwrap();
        assert_eq!(response.body, Some(Body::Text("Running".into())));
    }

    #[test]
    fn test_concurrent_identical_requests_consume_once() {
        let matcher = Arc::new(Matcher::new(
            vec![recorded("GET", "/a", "x"), recorded("GET", "/b", "y")],
            request_and_body_schema(),
            MatchMode::Lookup,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let matcher = Arc::clone(&matcher);
                std::thread::spawn(move || matcher.match_exchange(&observed("GET", "/a", None)).verdict)
            })
            .collect();
        let verdicts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(verdicts.iter().filter(|v| v.is_success()).count(), 1);
        assert_eq!(
            verdicts.iter().filter(|v| matches!(v, Verdict::NoMatch { .. })).count(),
            7
        );
        assert_eq!(matcher.remaining_len(), 1);
    }
}
