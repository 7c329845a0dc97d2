//! HTTP/1.x message-head parsing for reconstructed streams.
//!
//! # Design Decisions
//! - A segment is tagged as a request when it starts with a method token and
//!   as a response when it starts with `HTTP/`; everything else continues
//!   whichever message is in flight
//! - Heads that httparse rejects degrade to a best-effort line parse so a
//!   malformed message still yields an exchange

use httparse::Status;

use crate::exchange::headers::{self, Headers};

/// Maximum number of headers parsed per message head.
const MAX_HEADERS: usize = 96;

const METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "TRACE", "CONNECT",
];

/// What a TCP payload starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Request,
    Response,
    Continuation,
}

/// Classify a payload by its first bytes.
pub fn classify(payload: &[u8]) -> PayloadKind {
    if payload.starts_with(b"HTTP/") {
        return PayloadKind::Response;
    }
    let is_request = METHODS.iter().any(|m| {
        payload.len() > m.len() && payload.starts_with(m.as_bytes()) && payload[m.len()] == b' '
    });
    if is_request {
        PayloadKind::Request
    } else {
        PayloadKind::Continuation
    }
}

/// Parsed request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub headers: Headers,
    /// Offset of the first body byte within the parsed payload.
    pub body_offset: usize,
}

/// Parsed status line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status_code: u16,
    pub reason_phrase: String,
    pub headers: Headers,
    pub body_offset: usize,
}

pub fn parse_request_head(payload: &[u8]) -> RequestHead {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut raw);
    match request.parse(payload) {
        Ok(Status::Complete(body_offset)) => RequestHead {
            method: request.method.unwrap_or_default().to_string(),
            path: request.path.unwrap_or("/").to_string(),
            headers: collect_headers(request.headers),
            body_offset,
        },
        Ok(Status::Partial) => {
            tracing::warn!(len = payload.len(), "Request head is truncated, using best-effort parse");
            fallback_request(payload)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Malformed request head, using best-effort parse");
            fallback_request(payload)
        }
    }
}

pub fn parse_response_head(payload: &[u8]) -> ResponseHead {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut raw);
    match response.parse(payload) {
        Ok(Status::Complete(body_offset)) => ResponseHead {
            status_code: response.code.unwrap_or_default(),
            reason_phrase: response.reason.unwrap_or_default().to_string(),
            headers: collect_headers(response.headers),
            body_offset,
        },
        Ok(Status::Partial) => {
            tracing::warn!(len = payload.len(), "Response head is truncated, using best-effort parse");
            fallback_response(payload)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Malformed response head, using best-effort parse");
            fallback_response(payload)
        }
    }
}

/// True once `buf` holds a whole message head.
pub fn head_complete(buf: &[u8]) -> bool {
    find_subsequence(buf, b"\r\n\r\n").is_some()
}

/// Decode a complete chunked body.
///
/// Returns `None` until the terminating zero-size chunk has been received, or
/// when the framing is malformed.
pub fn dechunk(buf: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;
    loop {
        match httparse::parse_chunk_size(&buf[pos..]) {
            Ok(Status::Complete((consumed, size))) => {
                pos += consumed;
                if size == 0 {
                    return Some(out);
                }
                let end = pos.checked_add(usize::try_from(size).ok()?)?;
                if buf.len() < end + 2 {
                    return None;
                }
                out.extend_from_slice(&buf[pos..end]);
                pos = end + 2;
            }
            Ok(Status::Partial) | Err(_) => return None,
        }
    }
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> Headers {
    let mut collected = Headers::new();
    for header in raw {
        headers::insert(&mut collected, header.name, &String::from_utf8_lossy(header.value));
    }
    collected
}

/// Split a payload into its head lines and body offset without validation.
fn lenient_split(payload: &[u8]) -> (Vec<String>, usize) {
    let (head, body_offset) = match find_subsequence(payload, b"\r\n\r\n") {
        Some(i) => (&payload[..i], i + 4),
        None => (payload, payload.len()),
    };
    let lines = String::from_utf8_lossy(head)
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect();
    (lines, body_offset)
}

fn lenient_headers(lines: &[String]) -> Headers {
    let mut collected = Headers::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if !name.trim().is_empty() && !name.contains(' ') {
                headers::insert(&mut collected, name, value);
            }
        }
    }
    collected
}

fn fallback_request(payload: &[u8]) -> RequestHead {
    let (lines, body_offset) = lenient_split(payload);
    let mut start = lines.first().map(|l| l.split_whitespace()).into_iter().flatten();
    let method = start.next().unwrap_or("UNKNOWN").to_string();
    let path = start.next().unwrap_or("/").to_string();
    RequestHead {
        method,
        path,
        headers: lenient_headers(lines.get(1..).unwrap_or_default()),
        body_offset,
    }
}

fn fallback_response(payload: &[u8]) -> ResponseHead {
    let (lines, body_offset) = lenient_split(payload);
    let status_line = lines.first().cloned().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next();
    let status_code = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);
    let reason_phrase = parts.next().unwrap_or_default().to_string();
    ResponseHead {
        status_code,
        reason_phrase,
        headers: lenient_headers(lines.get(1..).unwrap_or_default()),
        body_offset,
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
