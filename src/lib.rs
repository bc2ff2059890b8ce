//! ReasonKit API Scope - Passive API Surface Discovery
//!
//! This crate watches the HTTP calls an application makes through clients it
//! chooses to instrument, and builds a live inventory of the API surface it
//! does not already know about.
//!
//! # Features
//!
//! - **Shape Inference**: Structural descriptions of arbitrary JSON, with
//!   order-independent merging of heterogeneous array elements
//! - **Redaction**: Credentials and session values masked before anything is kept
//! - **GraphQL Awareness**: Operation name, query and variables pulled from
//!   payloads, query strings or persisted-query paths
//! - **Stable Fingerprints**: One identity per call shape, insensitive to
//!   tweet ids and response content
//! - **Known-API Registry**: Declared endpoints are matched and skipped
//! - **Deduplicating Store**: Hit counts and first/last seen per shape class
//! - **Interceptors**: A tower layer and an `HttpTransport` decorator that
//!   never change what the caller sees
//!
//! # Architecture
//!
//! ```text
//! HTTP client ──▶ CaptureLayer / CapturingTransport ──▶ real call
//!                        │
//!                        ▼ (side channel)
//!                 ┌──────────────┐
//!                 │  Redactor    │
//!                 └──────┬───────┘
//!                        ▼
//!                 ┌──────────────┐     ┌──────────────┐
//!                 │ Shape + Hash │────▶│ GraphQL Meta │
//!                 └──────────────┘     └──────┬───────┘
//!                                             ▼
//!                                      ┌──────────────┐
//!                                      │ Fingerprint  │
//!                                      └──────┬───────┘
//!                                             ▼
//!                 ┌──────────────┐     ┌──────────────┐
//!                 │  Registry    │◀────│ UnknownApi   │──▶ list / search / to_json
//!                 │  (known?)    │     │ Store        │
//!                 └──────────────┘     └──────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use reasonkit_apiscope::{
//!     CaptureConfig, CapturePipeline, CapturedExchange, KnownApiRegistry, UnknownApiStore,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(UnknownApiStore::new(Arc::new(KnownApiRegistry::empty())));
//! let pipeline = CapturePipeline::new(CaptureConfig::default(), Arc::clone(&store));
//!
//! let exchange = CapturedExchange::new("GET", "https://x.com/1.1/account/settings.json")
//!     .header("Authorization", "Bearer secret")
//!     .response(200, r#"{"screen_name":"me"}"#);
//! pipeline.observe(exchange.clone());
//! pipeline.observe(exchange);
//!
//! let records = store.list();
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].hits, 2);
//! assert_eq!(records[0].headers["authorization"], "[REDACTED]");
//! ```
//!
//! # Shape Inference Example
//!
//! ```rust
//! use reasonkit_apiscope::hash::hash_shape;
//! use reasonkit_apiscope::shape::{infer_shape, ShapeKind};
//! use serde_json::json;
//!
//! let shape = infer_shape(&json!([1, "two", {"three": 3}]));
//! let element = shape.element().unwrap();
//! assert_eq!(element.kind(), ShapeKind::Unknown);
//! assert_eq!(element.variants().unwrap().len(), 3);
//!
//! let a = hash_shape(&infer_shape(&json!({"a": 1, "b": true})));
//! let b = hash_shape(&infer_shape(&json!({"b": true, "a": 1})));
//! assert_eq!(a, b);
//! ```
//!
//! # Tower Layer Example
//!
//! ```rust,no_run
//! use reasonkit_apiscope::{CaptureConfig, CapturePipeline, InstallFlag, Interceptor};
//! use reasonkit_apiscope::store::UnknownApiStore;
//! use std::sync::Arc;
//! use tower::ServiceBuilder;
//!
//! static INSTALLED: InstallFlag = InstallFlag::new();
//!
//! let store = Arc::new(UnknownApiStore::without_registry());
//! let pipeline = Arc::new(CapturePipeline::new(CaptureConfig::default(), store));
//!
//! if let Some(interceptor) = Interceptor::install(&INSTALLED, pipeline) {
//!     let _client = ServiceBuilder::new()
//!         .layer(interceptor.layer());
//!     // .service(your_http_client)
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod capture;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod graphql;
pub mod hash;
pub mod interceptor;
pub mod redact;
pub mod registry;
pub mod shape;
pub mod store;
pub mod telemetry;

// Re-exports for convenience
pub use capture::{CapturePipeline, CapturedExchange, RequestBody};
pub use config::CaptureConfig;
pub use error::{ApiScopeError, ApiScopeResult};
pub use fingerprint::{build_fingerprint, Fingerprint, FingerprintParts};
pub use graphql::{detect_graphql_meta, normalize_tweet_ids, GraphqlMeta, GraphqlProbe};
pub use hash::{hash_shape, hash_value, stable_stringify};
pub use interceptor::{
    BodyPreview, CaptureBody, CaptureLayer, CaptureService, CapturingTransport, HttpTransport,
    InboundResponse, InstallFlag, Interceptor, OutboundRequest, StagedCall,
};
pub use redact::{redact_sensitive_data, sanitize_headers};
pub use registry::{
    is_known_api_record, ApiGroup, KnownApiDefinition, KnownApiRegistry, MatchInput,
    XApiMatchRule,
};
pub use shape::{infer_shape, merge_shapes, ShapeKind, ShapeNode};
pub use store::{
    shared_store, RecordInput, SearchQuery, SharedUnknownApiStore, StoreStats, UnknownApiRecord,
    UnknownApiStore,
};
pub use telemetry::{init_tracing, init_tracing_with_format, LogFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
