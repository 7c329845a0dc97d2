//! Header normalization.
//!
//! # Design Decisions
//! - Names are lowercased so lookups and comparisons ignore case
//! - Repeated headers (notably `set-cookie`) are folded into one value joined
//!   by [`MULTI_VALUE_SEPARATOR`], since a JSON object cannot repeat keys
//! - Legacy corpora used `_` instead of `-` in names; lookups accept both
//! - Legacy corpora may also nest unrecognized headers one level down (for
//!   example under `Unknown_Headers`) or store non-string values; stored
//!   documents are flattened into the normal map when read back

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Separator placed between folded values of a repeated header.
pub const MULTI_VALUE_SEPARATOR: &str = "§ ";

/// Header mapping of an exchange (lowercased name -> folded value).
pub type Headers = BTreeMap<String, String>;

/// Normalize a header name for storage and lookup.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', "-")
}

/// Insert a header, folding it into an existing value of the same name.
pub fn insert(headers: &mut Headers, name: &str, value: &str) {
    let name = normalize_name(name);
    let value = value.trim();
    headers
        .entry(name)
        .and_modify(|existing| {
            existing.push_str(MULTI_VALUE_SEPARATOR);
            existing.push_str(value);
        })
        .or_insert_with(|| value.to_string());
}

/// Read a stored header map, tolerating legacy layouts.
///
/// Nested objects are flattened into the top level, arrays are folded like
/// repeated headers, and scalar values are stringified. Anything that is not
/// an object reads as no headers.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Headers, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(from_value_lenient(&value))
}

/// See [`deserialize_lenient`].
pub fn from_value_lenient(value: &Value) -> Headers {
    let mut headers = Headers::new();
    match value {
        Value::Object(map) => flatten_into(&mut headers, map),
        Value::Null => {}
        other => tracing::warn!(kind = value_kind(other), "Stored headers are not an object, ignoring"),
    }
    headers
}

fn flatten_into(headers: &mut Headers, map: &serde_json::Map<String, Value>) {
    for (name, value) in map {
        match value {
            Value::Object(nested) => flatten_into(headers, nested),
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = scalar_text(item) {
                        insert(headers, name, &text);
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    insert(headers, name, &text);
                }
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Split a folded header value back into its individual values.
pub fn split_values(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(MULTI_VALUE_SEPARATOR.trim_end())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Case-insensitive header lookup.
pub fn get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    let wanted = normalize_name(name);
    headers
        .iter()
        .find(|(k, _)| normalize_name(k) == wanted)
        .map(|(_, v)| v.as_str())
}

/// Declared `Content-Length`, if present and numeric.
pub fn content_length(headers: &Headers) -> Option<usize> {
    get(headers, "content-length").and_then(|v| v.trim().parse().ok())
}

/// Declared `Content-Type`, if present.
pub fn content_type(headers: &Headers) -> Option<&str> {
    get(headers, "content-type")
}

/// True when `Transfer-Encoding` lists `chunked`.
pub fn is_chunked(headers: &Headers) -> bool {
    get(headers, "transfer-encoding")
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
        .unwrap_or(false)
}
