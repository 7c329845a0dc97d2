//! Message bodies as stored in a corpus.
//!
//! Text bodies are stored as plain JSON strings; anything else is tagged with
//! its encoding: `{"encoding": "base64", "data": "..."}`.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Content types whose bodies are always stored as base64.
pub const BINARY_CONTENT_TYPES: &[&str] = &[
    "image/",
    "audio/",
    "video/",
    "application/octet-stream",
    "application/pdf",
    "application/zip",
];

/// Encoding tag of a non-plain body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyEncoding {
    #[serde(rename = "base64")]
    Base64,
    #[serde(rename = "utf-8")]
    Utf8,
}

/// A stored body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    Text(String),
    Encoded { encoding: BodyEncoding, data: String },
}

/// Outcome of decoding raw bytes as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedBody {
    Text(String),
    Raw(Vec<u8>),
}

impl DecodedBody {
    pub fn decode(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => DecodedBody::Text(text),
            Err(e) => DecodedBody::Raw(e.into_bytes()),
        }
    }
}

/// True when the content type names binary content.
pub fn is_binary_content_type(content_type: &str) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    BINARY_CONTENT_TYPES
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}

impl Body {
    /// Build a body from received bytes.
    ///
    /// Binary content types are always base64; otherwise UTF-8 is attempted
    /// and undecodable bytes fall back to base64.
    pub fn from_bytes(bytes: Vec<u8>, content_type: Option<&str>) -> Self {
        if content_type.is_some_and(is_binary_content_type) {
            return Body::base64(&bytes);
        }
        match DecodedBody::decode(bytes) {
            DecodedBody::Text(text) => Body::Text(text),
            DecodedBody::Raw(raw) => {
                tracing::debug!(len = raw.len(), "Body is not valid UTF-8, storing as base64");
                Body::base64(&raw)
            }
        }
    }

    pub fn base64(bytes: &[u8]) -> Self {
        Body::Encoded {
            encoding: BodyEncoding::Base64,
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Raw bytes of the body as they travel on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            Body::Text(text) => Ok(text.as_bytes().to_vec()),
            Body::Encoded { encoding: BodyEncoding::Utf8, data } => Ok(data.as_bytes().to_vec()),
            Body::Encoded { encoding: BodyEncoding::Base64, data } => {
                base64::engine::general_purpose::STANDARD.decode(data.trim())
            }
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Body::Encoded { encoding: BodyEncoding::Base64, .. })
    }
}
