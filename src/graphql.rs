//! GraphQL call classification and variable normalization
//!
//! Operation name, query and variables are pulled from (in order of
//! precedence) the decoded request payload, the URL query string, and the
//! `/graphql/<queryId>/<OperationName>` path convention.
//!
//! Variables are normalized before hashing: the whole subtree under any
//! tweet-id-like key is masked, so two requests that differ only in which
//! tweet they target hash identically. Every other value is kept as-is, so
//! a new flag or a different user still yields a different hash.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use url::Url;

use crate::config::DEFAULT_GRAPHQL_MARKER;
use crate::hash::hash_shape;
use crate::shape::infer_shape;

/// String substituted for every value under a tweet-id key
pub const TWEET_ID_PLACEHOLDER: &str = "1000000000000000000";

/// Numeric form of [`TWEET_ID_PLACEHOLDER`]
const TWEET_ID_PLACEHOLDER_NUM: u64 = 1_000_000_000_000_000_000;

/// Base used to resolve relative request URLs
const RELATIVE_URL_BASE: &str = "http://localhost/";

/// GraphQL details extracted from one call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlMeta {
    /// Whether the call is treated as GraphQL
    pub is_graphql: bool,
    /// Operation name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Query document (or persisted-query id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Raw variables, before tweet-id masking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    /// Hash of the masked variables' shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables_shape_hash: Option<String>,
}

/// Input to [`detect_graphql_meta`]
#[derive(Debug, Clone, Copy)]
pub struct GraphqlProbe<'a> {
    /// HTTP method
    pub method: &'a str,
    /// URL path
    pub path: &'a str,
    /// Full (or relative) request URL
    pub url: &'a str,
    /// Decoded request payload, if any
    pub request_payload: Option<&'a Value>,
    /// Path substring marking a GraphQL endpoint
    pub marker: &'a str,
}

impl<'a> GraphqlProbe<'a> {
    /// Create a probe using the default `/graphql` marker
    pub fn new(
        method: &'a str,
        path: &'a str,
        url: &'a str,
        request_payload: Option<&'a Value>,
    ) -> Self {
        Self {
            method,
            path,
            url,
            request_payload,
            marker: DEFAULT_GRAPHQL_MARKER,
        }
    }

    /// Override the GraphQL path marker
    pub fn with_marker(mut self, marker: &'a str) -> Self {
        self.marker = marker;
        self
    }
}

#[derive(Debug, Default)]
struct ExtractedFields {
    operation_name: Option<String>,
    query: Option<String>,
    variables: Option<Value>,
}

/// Classify a call and extract its GraphQL details
pub fn detect_graphql_meta(probe: &GraphqlProbe<'_>) -> GraphqlMeta {
    let method = probe.method.to_ascii_uppercase();
    if method != "GET" && method != "POST" {
        return GraphqlMeta::default();
    }

    let from_payload = probe
        .request_payload
        .map(fields_from_payload)
        .unwrap_or_default();
    let from_url = fields_from_url(probe.url);

    let operation_name = from_payload
        .operation_name
        .or(from_url.operation_name)
        .or_else(|| operation_from_path(probe.path, probe.marker));
    let query = from_payload.query.or(from_url.query);
    let variables = from_payload.variables.or(from_url.variables);

    let is_graphql = probe.path.contains(probe.marker)
        || operation_name.is_some()
        || query.is_some()
        || variables.is_some();
    if !is_graphql {
        return GraphqlMeta::default();
    }

    let variables_shape_hash = variables
        .as_ref()
        .map(|vars| hash_shape(&infer_shape(&normalize_tweet_ids(vars))));

    GraphqlMeta {
        is_graphql,
        operation_name,
        query,
        variables,
        variables_shape_hash,
    }
}

fn fields_from_payload(payload: &Value) -> ExtractedFields {
    let object = match payload {
        Value::Object(map) => map,
        // batched operations: the first one names the call
        Value::Array(items) => match items.iter().find_map(Value::as_object) {
            Some(map) => map,
            None => return ExtractedFields::default(),
        },
        _ => return ExtractedFields::default(),
    };

    ExtractedFields {
        operation_name: non_empty_str(object.get("operationName")),
        query: non_empty_str(object.get("query")),
        variables: object.get("variables").and_then(decode_variables),
    }
}

fn fields_from_url(raw: &str) -> ExtractedFields {
    let url = match resolve_url(raw) {
        Ok(url) => url,
        Err(_) => return ExtractedFields::default(),
    };

    let mut fields = ExtractedFields::default();
    for (name, value) in url.query_pairs() {
        if value.is_empty() {
            continue;
        }
        match &*name {
            "operationName" if fields.operation_name.is_none() => {
                fields.operation_name = Some(value.into_owned())
            }
            "query" if fields.query.is_none() => fields.query = Some(value.into_owned()),
            "variables" if fields.variables.is_none() => {
                fields.variables = decode_variables(&Value::String(value.into_owned()))
            }
            _ => {}
        }
    }
    fields
}

/// `/i/api/graphql/<queryId>/<OperationName>`: the segment after the query id
fn operation_from_path(path: &str, marker: &str) -> Option<String> {
    let marker_segment = marker.trim_matches('/').rsplit('/').next()?;
    if marker_segment.is_empty() {
        return None;
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let position = segments.iter().position(|s| *s == marker_segment)?;
    segments
        .get(position + 2)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// Variables often arrive JSON-encoded inside a string.
fn decode_variables(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => {
            Some(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())))
        }
        other => Some(other.clone()),
    }
}

/// Resolve a possibly-relative URL against a placeholder origin
pub fn resolve_url(raw: &str) -> Result<Url, url::ParseError> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(RELATIVE_URL_BASE)?.join(raw),
        Err(e) => Err(e),
    }
}

/// Whether a key names one or more tweet ids (`tweet_id`, `focalTweetId`, ...)
pub fn is_tweet_id_key(key: &str) -> bool {
    let folded: String = key
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    folded.ends_with("tweetid") || folded.ends_with("tweetids")
}

/// Copy `value`, masking every subtree that sits under a tweet-id key
pub fn normalize_tweet_ids(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(normalize_tweet_ids).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                let normalized = if is_tweet_id_key(key) {
                    mask_subtree(item)
                } else {
                    normalize_tweet_ids(item)
                };
                out.insert(key.clone(), normalized);
            }
            Value::Object(out)
        }
        scalar => scalar.clone(),
    }
}

fn mask_subtree(value: &Value) -> Value {
    match value {
        Value::String(_) => Value::String(TWEET_ID_PLACEHOLDER.to_string()),
        Value::Number(_) => Value::Number(Number::from(TWEET_ID_PLACEHOLDER_NUM)),
        Value::Array(items) => Value::Array(items.iter().map(mask_subtree).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), mask_subtree(item)))
                .collect(),
        ),
        other => other.clone(),
    }
}
