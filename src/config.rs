//! Capture pipeline configuration
//!
//! Tuning knobs only. Whether interceptors are installed at all is decided by
//! the host application, not by anything read here.

use std::env;

use crate::error::{ApiScopeError, ApiScopeResult};

/// Default cap on response bytes teed from a streamed body (1 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Default length of the text sample kept for non-JSON bodies
pub const DEFAULT_MAX_TEXT_SAMPLE: usize = 500;

/// Default cap on a serialized redacted sample (16 KiB)
pub const DEFAULT_MAX_SAMPLE_BYTES: usize = 16 * 1024;

/// Default path marker identifying GraphQL endpoints
pub const DEFAULT_GRAPHQL_MARKER: &str = "/graphql";

/// Configuration for the capture pipeline
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Maximum response bytes buffered while teeing a body
    pub max_body_bytes: usize,

    /// Characters kept when a body is not JSON
    pub max_text_sample: usize,

    /// Redacted samples larger than this (serialized) are replaced by a
    /// truncated string
    pub max_sample_bytes: usize,

    /// Path substring marking a GraphQL endpoint
    pub graphql_marker: String,

    /// Whether to log redacted payload samples at debug level
    pub log_payloads: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_text_sample: DEFAULT_MAX_TEXT_SAMPLE,
            max_sample_bytes: DEFAULT_MAX_SAMPLE_BYTES,
            graphql_marker: DEFAULT_GRAPHQL_MARKER.to_string(),
            log_payloads: false,
        }
    }
}

impl CaptureConfig {
    /// Create configuration from environment variables
    ///
    /// # Environment Variables
    ///
    /// - `RK_APISCOPE_MAX_BODY_BYTES` (optional): tee limit in bytes (default: 1048576)
    /// - `RK_APISCOPE_MAX_TEXT_SAMPLE` (optional): text sample length (default: 500)
    /// - `RK_APISCOPE_MAX_SAMPLE_BYTES` (optional): redacted sample cap (default: 16384)
    /// - `RK_APISCOPE_GRAPHQL_MARKER` (optional): GraphQL path marker (default: `/graphql`)
    /// - `RK_APISCOPE_LOG_PAYLOADS` (optional): log redacted samples (default: false)
    ///
    /// # Errors
    ///
    /// Returns `ApiScopeError::Config` when a numeric variable does not parse
    /// or the marker is empty.
    pub fn from_env() -> ApiScopeResult<Self> {
        let defaults = Self::default();

        let max_body_bytes =
            read_usize("RK_APISCOPE_MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes);
        let max_text_sample =
            read_usize("RK_APISCOPE_MAX_TEXT_SAMPLE")?.unwrap_or(defaults.max_text_sample);
        let max_sample_bytes =
            read_usize("RK_APISCOPE_MAX_SAMPLE_BYTES")?.unwrap_or(defaults.max_sample_bytes);

        let graphql_marker = match env::var("RK_APISCOPE_GRAPHQL_MARKER") {
            Ok(marker) if marker.trim().is_empty() => {
                return Err(ApiScopeError::Config {
                    var: "RK_APISCOPE_GRAPHQL_MARKER",
                    value: marker,
                })
            }
            Ok(marker) => marker,
            Err(_) => defaults.graphql_marker,
        };

        let log_payloads = env::var("RK_APISCOPE_LOG_PAYLOADS")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            max_body_bytes,
            max_text_sample,
            max_sample_bytes,
            graphql_marker,
            log_payloads,
        })
    }
}

fn read_usize(var: &'static str) -> ApiScopeResult<Option<usize>> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ApiScopeError::Config { var, value: raw }),
        Err(_) => Ok(None),
    }
}
