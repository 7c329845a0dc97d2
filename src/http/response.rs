//! Response synthesis from recorded exchanges.
//!
//! # Responsibilities
//! - Rebuild a wire response from a recorded response document
//! - Expand joined `Set-Cookie` values into one header per cookie
//! - Decode stored bodies back into raw bytes
//!
//! # Design Decisions
//! - Framing headers are dropped; hyper recomputes them for the new body
//! - Header names or values that no longer parse are skipped with a warning

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::exchange::headers;
use crate::exchange::HttpResponseRecord;
use crate::http::cookie::SetCookie;

/// Headers the transport recomputes for the replayed body.
const FRAMING_HEADERS: &[&str] = &["content-length", "content-encoding", "transfer-encoding"];

const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Build the response to serve for a recorded response.
pub fn replay_response(recorded: &HttpResponseRecord) -> Response {
    let status = StatusCode::from_u16(recorded.status_code).unwrap_or_else(|_| {
        tracing::warn!(status = recorded.status_code, "Recorded status code is invalid, serving 200");
        StatusCode::OK
    });

    let body = match &recorded.body {
        Some(body) => match body.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Recorded body is not valid base64, serving empty body");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let out = response.headers_mut();

    for (name, value) in &recorded.headers {
        let name = headers::normalize_name(name);
        if FRAMING_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::warn!(header = %name, "Skipping recorded header with invalid name");
            continue;
        };

        let values: Vec<String> = if header_name == header::SET_COOKIE {
            headers::split_values(value)
                .filter_map(|raw| match SetCookie::parse(raw) {
                    Some(cookie) => Some(cookie.to_string()),
                    None => {
                        tracing::warn!(cookie = raw, "Skipping unparseable recorded cookie");
                        None
                    }
                })
                .collect()
        } else {
            headers::split_values(value).map(str::to_string).collect()
        };

        for value in values {
            match HeaderValue::from_str(&value) {
                Ok(v) => {
                    out.append(header_name.clone(), v);
                }
                Err(_) => tracing::warn!(header = %header_name, "Skipping recorded header with invalid value"),
            }
        }
    }

    if !out.contains_key(header::CONTENT_TYPE) {
        out.insert(header::CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    }
    response
}

/// 404 served when no recorded exchange matches.
pub fn no_match_response() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "No matching packet found"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Body as StoredBody, Headers};

    fn record(pairs: &[(&str, &str)], body: Option<StoredBody>) -> HttpResponseRecord {
        let mut map = Headers::new();
        for (name, value) in pairs {
            headers::insert(&mut map, name, value);
        }
        HttpResponseRecord {
            headers: map,
            body,
            ..Default::default()
        }
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_cookies_expanded() {
        let response = replay_response(&record(
            &[("Set-Cookie", "a=1; HttpOnly"), ("Set-Cookie", "b=2; Max-Age=60")],
            None,
        ));
        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies, vec!["a=1; HttpOnly", "b=2; Max-Age=60"]);
    }

    #[tokio::test]
    async fn test_framing_headers_dropped_and_legacy_names_normalized() {
        let response = replay_response(&record(
            &[
                ("Content_Type", "application/json"),
                ("Content-Length", "999"),
                ("Transfer-Encoding", "chunked"),
                ("Content-Encoding", "gzip"),
            ],
            Some(StoredBody::Text("{}".into())),
        ));
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(body_bytes(response).await, b"{}");
    }

    #[tokio::test]
    async fn test_binary_body_decoded() {
        let png = vec![0x89, b'P', b'N', b'G', 0x00, 0xff];
        let response = replay_response(&record(
            &[("Content-Type", "image/png")],
            Some(StoredBody::base64(&png)),
        ));
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(body_bytes(response).await, png);
    }

    #[tokio::test]
    async fn test_defaults() {
        let mut recorded = record(&[], Some(StoredBody::Text("Running".into())));
        recorded.status_code = 503;
        let response = replay_response(&recorded);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::CONTENT_TYPE], DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_no_match_body() {
        let response = no_match_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body, json!({"error": "No matching packet found"}));
    }
}
