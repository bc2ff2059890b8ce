//! Error types for API surface discovery
//!
//! Errors here never cross into the intercepted call. The capture pipeline
//! converts every failure into a log line and a counter; these types exist so
//! the internal stages can use `?` and so registry/config construction can
//! report what went wrong.

use thiserror::Error;

/// Errors raised while building registries, loading config, or capturing calls
#[derive(Error, Debug)]
pub enum ApiScopeError {
    // =========================================================================
    // Capture Errors (swallowed by the pipeline)
    // =========================================================================
    /// The request URL could not be parsed, even against a relative base
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A pipeline stage panicked; the panic was contained
    #[error("Capture stage panicked: {0}")]
    CapturePanicked(String),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// A match rule could not be compiled
    #[error("Invalid match rule for '{name}': {reason}")]
    InvalidRule {
        /// Registry entry name
        name: String,
        /// Why the rule was rejected
        reason: String,
    },

    /// The registry document has an unexpected layout
    #[error("Invalid registry: {0}")]
    InvalidRegistry(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// An environment variable held an unusable value
    #[error("Invalid configuration value for {var}: {value}")]
    Config {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },
}

/// Result type for API scope operations
pub type ApiScopeResult<T> = std::result::Result<T, ApiScopeError>;

impl ApiScopeError {
    /// Get error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "INVALID_URL",
            Self::Json(_) => "JSON_ERROR",
            Self::CapturePanicked(_) => "CAPTURE_PANICKED",
            Self::InvalidRule { .. } => "INVALID_RULE",
            Self::InvalidRegistry(_) => "INVALID_REGISTRY",
            Self::Config { .. } => "INVALID_CONFIG",
        }
    }

    /// Whether this error came from observing a call (as opposed to setup)
    pub fn is_capture_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_) | Self::Json(_) | Self::CapturePanicked(_)
        )
    }
}
