//! Exchange data model.
//!
//! An [`Exchange`] pairs one HTTP request with its response, together with
//! the addressing of both directions. This is the unit that is captured,
//! projected, persisted, matched and replayed.
//!
//! # JSON shape
//! ```text
//! {
//!   "request":  { source_ip, destination_ip, source_port, destination_port,
//!                 method, path, headers, body? },
//!   "response": { source_ip, destination_ip, source_port, destination_port,
//!                 status_code, reason_phrase, headers, body? }
//! }
//! ```

pub mod body;
pub mod headers;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub use body::{Body, BodyEncoding, DecodedBody};
pub use headers::{Headers, MULTI_VALUE_SEPARATOR};

/// Captured (or received) HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HttpRequestRecord {
    pub source_ip: String,
    pub destination_ip: String,
    pub source_port: u16,
    pub destination_port: u16,
    pub method: String,
    /// Request target including the query string.
    pub path: String,
    #[serde(deserialize_with = "headers::deserialize_lenient")]
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
}

/// Captured HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpResponseRecord {
    pub source_ip: String,
    pub destination_ip: String,
    pub source_port: u16,
    pub destination_port: u16,
    #[serde(deserialize_with = "status_code_from_any")]
    pub status_code: u16,
    pub reason_phrase: String,
    #[serde(deserialize_with = "headers::deserialize_lenient")]
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
}

impl Default for HttpResponseRecord {
    fn default() -> Self {
        Self {
            source_ip: String::new(),
            destination_ip: String::new(),
            source_port: 0,
            destination_port: 0,
            status_code: 200,
            reason_phrase: "OK".to_string(),
            headers: Headers::new(),
            body: None,
        }
    }
}

/// One request and, once fully received, its response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Exchange {
    #[serde(default)]
    pub request: HttpRequestRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponseRecord>,
}

/// Identity used to pair a live exchange with a recorded one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchKey {
    pub method: String,
    pub path: String,
}

impl MatchKey {
    /// Extract the key from a (possibly projected) exchange document.
    pub fn from_value(value: &Value) -> Option<Self> {
        let method = value.pointer("/request/method")?.as_str()?;
        let path = value.pointer("/request/path")?.as_str()?;
        Some(Self {
            method: method.to_string(),
            path: path.to_string(),
        })
    }
}

impl std::fmt::Display for MatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

impl Exchange {
    pub fn key(&self) -> MatchKey {
        MatchKey {
            method: self.request.method.clone(),
            path: self.request.path.clone(),
        }
    }

    /// JSON document form used for projection, diffing and persistence.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Response section of a stored exchange document, with defaults for
/// anything the schema projected away.
///
/// A malformed document is salvaged field by field, so one bad field does not
/// discard the recorded status or body.
pub fn response_from_value(value: &Value) -> Option<HttpResponseRecord> {
    let response = value.get("response")?;
    match serde_json::from_value(response.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(error = %e, "Recorded response is malformed, salvaging readable fields");
            Some(salvage_response(response))
        }
    }
}

fn salvage_response(response: &Value) -> HttpResponseRecord {
    let mut record = HttpResponseRecord::default();
    let text = |field: &str| response.get(field).and_then(Value::as_str).map(str::to_string);
    let port = |field: &str| {
        response
            .get(field)
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
    };

    if let Some(ip) = text("source_ip") {
        record.source_ip = ip;
    }
    if let Some(ip) = text("destination_ip") {
        record.destination_ip = ip;
    }
    if let Some(p) = port("source_port") {
        record.source_port = p;
    }
    if let Some(p) = port("destination_port") {
        record.destination_port = p;
    }
    match response.get("status_code").map(status_code_from_value) {
        Some(Some(code)) => record.status_code = code,
        Some(None) => tracing::warn!("Recorded status code is unreadable, serving 200"),
        None => {}
    }
    if let Some(reason) = text("reason_phrase") {
        record.reason_phrase = reason;
    }
    if let Some(stored) = response.get("headers") {
        record.headers = headers::from_value_lenient(stored);
    }
    if let Some(body) = response.get("body").filter(|b| !b.is_null()) {
        match serde_json::from_value(body.clone()) {
            Ok(body) => record.body = Some(body),
            Err(e) => tracing::warn!(error = %e, "Recorded body is unreadable, serving empty body"),
        }
    }
    record
}

fn status_code_from_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|c| u16::try_from(c).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl HttpRequestRecord {
    /// Serialize as an HTTP/1.1 request message.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, self.path).into_bytes();
        write_head_and_body(&mut out, &self.headers, self.body.as_ref());
        out
    }
}

impl HttpResponseRecord {
    /// Serialize as an HTTP/1.1 response message.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.reason_phrase).into_bytes();
        write_head_and_body(&mut out, &self.headers, self.body.as_ref());
        out
    }
}

fn write_head_and_body(out: &mut Vec<u8>, headers: &Headers, body: Option<&Body>) {
    for (name, value) in headers {
        for single in headers::split_values(value) {
            out.extend_from_slice(format!("{}: {}\r\n", name, single).as_bytes());
        }
    }
    out.extend_from_slice(b"\r\n");
    if let Some(body) = body {
        match body.to_bytes() {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(e) => tracing::warn!(error = %e, "Stored body is not valid base64, omitting"),
        }
    }
}

fn status_code_from_any<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Status {
        Number(u16),
        Text(String),
    }

    match Status::deserialize(deserializer)? {
        Status::Number(code) => Ok(code),
        Status::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
