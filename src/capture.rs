//! Capture pipeline
//!
//! Every interceptor surface funnels its observations through
//! [`CapturePipeline::observe`]:
//!
//! ```text
//! CapturedExchange ──> payloads ──> redact ──> shapes ──> GraphQL meta
//!                                                             │
//!                          store.upsert <── known? <── fingerprint
//! ```
//!
//! The pipeline is a side channel. `observe` never returns an error and
//! never panics; failures are logged at debug level and counted.

use bytes::Bytes;
use metrics::counter;
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::CaptureConfig;
use crate::error::{ApiScopeError, ApiScopeResult};
use crate::fingerprint::{build_fingerprint, FingerprintParts};
use crate::graphql::{detect_graphql_meta, resolve_url, GraphqlProbe};
use crate::hash::hash_shape;
use crate::redact::{redact_sensitive_data, sanitize_headers};
use crate::shape::{infer_optional_shape, truncate_chars};
use crate::store::{RecordInput, UnknownApiRecord, UnknownApiStore};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const DEFAULT_BLOB_TYPE: &str = "application/octet-stream";

/// Request body as seen by an interceptor
///
/// Binary and streaming bodies are only described, never read, so the
/// intercepted call keeps sole ownership of their contents.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body
    Empty,
    /// Text; decoded as JSON when it parses
    Text(String),
    /// Structured JSON
    Json(Value),
    /// URL-encoded form fields, in order
    Form(Vec<(String, String)>),
    /// Multipart form data
    Multipart,
    /// Opaque blob
    Blob {
        /// Size in bytes
        size: u64,
        /// Declared media type
        content_type: Option<String>,
    },
    /// Raw byte buffer
    Binary {
        /// Length in bytes
        byte_length: usize,
    },
    /// Typed view over a byte buffer
    TypedArray {
        /// View type name, e.g. `Uint8Array`
        element: String,
        /// Number of elements
        length: usize,
    },
    /// Markup document
    Document,
    /// Streaming body
    Stream,
}

impl RequestBody {
    /// Reinterpret a text body as form fields when the content type says so
    pub fn with_content_type(self, content_type: Option<&str>) -> Self {
        let is_form = content_type
            .map(|ct| ct.to_ascii_lowercase().starts_with(FORM_URLENCODED))
            .unwrap_or(false);
        match self {
            RequestBody::Text(text) if is_form => RequestBody::Form(
                url::form_urlencoded::parse(text.as_bytes())
                    .into_owned()
                    .collect(),
            ),
            other => other,
        }
    }

    /// Decode the body into a payload value, or describe it with a placeholder
    pub fn to_payload(&self, max_text_sample: usize) -> Option<Value> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Text(text) if text.is_empty() => None,
            RequestBody::Text(text) => Some(parse_text(text, max_text_sample)),
            RequestBody::Json(value) => Some(value.clone()),
            RequestBody::Form(fields) => {
                let mut object = Map::new();
                for (name, value) in fields {
                    object
                        .entry(name.clone())
                        .or_insert_with(|| Value::String(value.clone()));
                }
                Some(Value::Object(object))
            }
            placeholder => Some(Value::String(placeholder.describe())),
        }
    }

    fn describe(&self) -> String {
        match self {
            RequestBody::Multipart => "[FormData]".to_string(),
            RequestBody::Blob { size, content_type } => format!(
                "[Blob size={} type={}]",
                size,
                content_type.as_deref().unwrap_or(DEFAULT_BLOB_TYPE)
            ),
            RequestBody::Binary { byte_length } => {
                format!("[ArrayBuffer byteLength={}]", byte_length)
            }
            RequestBody::TypedArray { element, length } => {
                format!("[{} length={}]", element, length)
            }
            RequestBody::Document => "[Document]".to_string(),
            RequestBody::Stream => "[ReadableStream]".to_string(),
            RequestBody::Empty => String::new(),
            RequestBody::Text(_) | RequestBody::Json(_) | RequestBody::Form(_) => {
                "[Body]".to_string()
            }
        }
    }
}

/// Everything an interceptor saw about one call
#[derive(Debug, Clone)]
pub struct CapturedExchange {
    /// HTTP method, any case
    pub method: String,
    /// Absolute or relative request URL
    pub url: String,
    /// Request headers as sent; redacted by the pipeline
    pub request_headers: Vec<(String, String)>,
    /// Request body
    pub request_body: RequestBody,
    /// Response status, absent when the call failed
    pub status: Option<u16>,
    /// Response bytes read so far
    pub response_body: Option<Bytes>,
    /// Whether `response_body` stops short of the real body
    pub response_truncated: bool,
    /// Failure reported by the intercepted call
    pub error: Option<String>,
}

impl CapturedExchange {
    /// Start describing a call
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            request_headers: Vec::new(),
            request_body: RequestBody::Empty,
            status: None,
            response_body: None,
            response_truncated: false,
            error: None,
        }
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.push((name.into(), value.into()));
        self
    }

    /// Set the request body
    pub fn request_body(mut self, body: RequestBody) -> Self {
        self.request_body = body;
        self
    }

    /// Record a completed response
    pub fn response(mut self, status: u16, body: impl Into<Bytes>) -> Self {
        self.status = Some(status);
        self.response_body = Some(body.into());
        self
    }

    /// Record a failed call
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Redact, fingerprint and store observed calls
pub struct CapturePipeline {
    config: CaptureConfig,
    store: Arc<UnknownApiStore>,
}

impl CapturePipeline {
    /// Create a pipeline feeding `store`
    pub fn new(config: CaptureConfig, store: Arc<UnknownApiStore>) -> Self {
        Self { config, store }
    }

    /// Pipeline configuration
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Store receiving unknown calls
    pub fn store(&self) -> &Arc<UnknownApiStore> {
        &self.store
    }

    /// Capture one call, swallowing every failure
    ///
    /// Returns the stored record, or `None` when the call was known or the
    /// capture failed.
    #[instrument(
        skip_all,
        fields(capture_id = %Uuid::new_v4(), method = %exchange.method, url = %exchange.url)
    )]
    pub fn observe(&self, exchange: CapturedExchange) -> Option<UnknownApiRecord> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.capture(exchange)))
            .unwrap_or_else(|payload| Err(ApiScopeError::CapturePanicked(panic_message(&payload))));

        match outcome {
            Ok(Some(record)) => {
                counter!("apiscope_captures_total", "outcome" => "recorded").increment(1);
                Some(record)
            }
            Ok(None) => {
                counter!("apiscope_captures_total", "outcome" => "known").increment(1);
                None
            }
            Err(e) => {
                counter!("apiscope_captures_total", "outcome" => "failed").increment(1);
                counter!("apiscope_capture_failures_total", "stage" => e.error_code())
                    .increment(1);
                debug!(error = %e, code = e.error_code(), "Capture failed");
                None
            }
        }
    }

    /// Capture one call, reporting failures
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` when the URL cannot be resolved.
    pub fn capture(&self, exchange: CapturedExchange) -> ApiScopeResult<Option<UnknownApiRecord>> {
        let url = resolve_url(&exchange.url)
            .map_err(|e| ApiScopeError::InvalidUrl(format!("{}: {}", exchange.url, e)))?;
        let method = exchange.method.to_ascii_uppercase();
        let path = url.path().to_string();

        let request_payload = exchange
            .request_body
            .to_payload(self.config.max_text_sample)
            .map(|payload| redact_sensitive_data(&payload));
        let response_payload = exchange
            .response_body
            .as_deref()
            .and_then(|body| parse_response(body, self.config.max_text_sample))
            .map(|payload| redact_sensitive_data(&payload));

        let request_shape = infer_optional_shape(request_payload.as_ref());
        let response_shape = infer_optional_shape(response_payload.as_ref());

        let graphql = detect_graphql_meta(
            &GraphqlProbe::new(&method, &path, url.as_str(), request_payload.as_ref())
                .with_marker(&self.config.graphql_marker),
        );

        let request_shape_hash = hash_shape(&request_shape.structure());
        let response_shape_hash = hash_shape(&response_shape.structure());
        let key = build_fingerprint(&FingerprintParts {
            method: &method,
            path: &path,
            graphql: &graphql,
            request_shape_hash: &request_shape_hash,
            response_shape_hash: &response_shape_hash,
        });

        let request_sample = request_payload.map(|v| cap_sample(v, self.config.max_sample_bytes));
        let response_sample =
            response_payload.map(|v| cap_sample(v, self.config.max_sample_bytes));
        if self.config.log_payloads {
            debug!(
                key = %key,
                request = ?request_sample,
                response = ?response_sample,
                truncated = exchange.response_truncated,
                "Captured payloads"
            );
        }

        let headers = sanitize_headers(
            exchange
                .request_headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );

        Ok(self.store.upsert(RecordInput {
            key,
            method,
            path,
            url: url.to_string(),
            status: exchange.status,
            is_graphql: graphql.is_graphql,
            operation_name: graphql.operation_name,
            variables_shape_hash: graphql.variables_shape_hash,
            request_shape,
            response_shape,
            request_sample,
            response_sample,
            headers,
            error: exchange.error,
        }))
    }
}

fn parse_text(text: &str, max_text_sample: usize) -> Value {
    serde_json::from_str(text)
        .unwrap_or_else(|_| Value::String(truncate_chars(text, max_text_sample)))
}

fn parse_response(body: &[u8], max_text_sample: usize) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice(body) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(truncate_chars(
            &String::from_utf8_lossy(body),
            max_text_sample,
        ))),
    }
}

/// Oversized samples become a truncated string of their serialized form
fn cap_sample(value: Value, max_bytes: usize) -> Value {
    let encoded = match serde_json::to_string(&value) {
        Ok(encoded) => encoded,
        Err(_) => return value,
    };
    if encoded.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes;
    while !encoded.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...[truncated]", &encoded[..cut]))
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
