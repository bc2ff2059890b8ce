//! Sensitive-data redaction for captured payloads and headers
//!
//! Redaction produces an owned copy; the input is only borrowed. Any value
//! under a key that looks like a credential is replaced wholesale by
//! [`REDACTED_MARKER`], whatever its type or nesting.

use axum::http::HeaderMap;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Replacement for sensitive values
pub const REDACTED_MARKER: &str = "[REDACTED]";

/// Replacement for values nested deeper than [`MAX_REDACT_DEPTH`]
pub const DEPTH_LIMIT_MARKER: &str = "[MaxDepth]";

/// Nesting depth at which redaction stops descending
pub const MAX_REDACT_DEPTH: usize = 64;

static SENSITIVE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)authorization|cookie|token|secret|csrf|password|session|bearer|oauth")
        .unwrap()
});

/// Whether a key names credential-like data
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEY.is_match(key)
}

/// Deep-copy a value, replacing everything under sensitive keys
pub fn redact_sensitive_data(value: &Value) -> Value {
    redact_at(value, 0)
}

fn redact_at(value: &Value, depth: usize) -> Value {
    if depth >= MAX_REDACT_DEPTH {
        return Value::String(DEPTH_LIMIT_MARKER.to_string());
    }

    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_at(item, depth + 1))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                let redacted = if is_sensitive_key(key) {
                    Value::String(REDACTED_MARKER.to_string())
                } else {
                    redact_at(item, depth + 1)
                };
                out.insert(key.clone(), redacted);
            }
            Value::Object(out)
        }
        scalar => scalar.clone(),
    }
}

/// Redact a flat header list
///
/// Header names are lowercased. Repeated names are joined with `", "` in
/// the order they appear.
pub fn sanitize_headers<'a, I>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        out.entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    for (name, value) in out.iter_mut() {
        if is_sensitive_key(name) {
            *value = REDACTED_MARKER.to_string();
        }
    }
    out
}

/// Redact an `http::HeaderMap`; non-UTF-8 values are kept lossily
pub fn sanitize_header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    sanitize_headers(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}
