//! Tracing subscriber setup
//!
//! Optional: hosts that already install a subscriber keep theirs, because
//! every initializer here uses `try_init` and backs off when one exists.
//!
//! # Example
//!
//! ```rust,no_run
//! use reasonkit_apiscope::telemetry::init_tracing;
//!
//! std::env::set_var("RUST_LOG", "info,reasonkit_apiscope=debug");
//! std::env::set_var("RK_APISCOPE_LOG_FORMAT", "json");
//!
//! init_tracing();
//! ```

use std::str::FromStr;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Environment variable for log format
pub const LOG_FORMAT_ENV: &str = "RK_APISCOPE_LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,reasonkit_apiscope=info";

/// Log format for tracing output
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format (structured, machine-readable)
    Json,
    /// Pretty format (human-readable, colored)
    #[default]
    Pretty,
    /// Compact format (single-line, minimal)
    Compact,
}

impl LogFormat {
    /// Read from `RK_APISCOPE_LOG_FORMAT`
    ///
    /// Unset or unrecognized values fall back to pretty output in debug
    /// builds and JSON in release builds.
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(if cfg!(debug_assertions) {
                LogFormat::Pretty
            } else {
                LogFormat::Json
            })
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Initialize the tracing subscriber using `RUST_LOG` and
/// `RK_APISCOPE_LOG_FORMAT`
///
/// Returns `false` when a global subscriber was already set.
pub fn init_tracing() -> bool {
    init_tracing_with_format(LogFormat::from_env())
}

/// Initialize tracing with a specific format
pub fn init_tracing_with_format(format: LogFormat) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    result.is_ok()
}
