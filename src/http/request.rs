//! Incoming request capture.
//!
//! # Responsibilities
//! - Turn a received request into an [`Exchange`] shaped like a captured one
//! - Record peer and listener addressing for both directions
//!
//! # Design Decisions
//! - The path keeps its query string, matching what capture records
//! - Header names are normalized exactly as capture normalizes them

use std::net::SocketAddr;

use axum::http::request::Parts;

use crate::exchange::{headers, Body, Exchange, Headers, HttpRequestRecord};

/// Build the observed exchange for a served request.
pub fn incoming_exchange(parts: &Parts, body: &[u8], peer: SocketAddr, local: SocketAddr) -> Exchange {
    let mut request_headers = Headers::new();
    for (name, value) in &parts.headers {
        headers::insert(&mut request_headers, name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
    }

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let content_type = headers::content_type(&request_headers).map(str::to_string);
    let body = (!body.is_empty()).then(|| Body::from_bytes(body.to_vec(), content_type.as_deref()));

    Exchange {
        request: HttpRequestRecord {
            source_ip: peer.ip().to_string(),
            destination_ip: local.ip().to_string(),
            source_port: peer.port(),
            destination_port: local.port(),
            method: parts.method.as_str().to_string(),
            path,
            headers: request_headers,
            body,
        },
        response: None,
    }
}
