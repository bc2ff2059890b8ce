//! Fingerprint construction
//!
//! A fingerprint is a pipe-joined identity string for one class of API call:
//!
//! ```text
//! gql|METHOD|path|operationName|variablesShapeHash
//! rest|METHOD|path|requestShapeHash|responseShapeHash
//! ```
//!
//! Building one never fails; missing optional parts fall back to the literal
//! tokens [`UNKNOWN_OPERATION`] and [`NO_VARIABLES`].

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::graphql::GraphqlMeta;

/// Placeholder for a GraphQL call with no operation name
pub const UNKNOWN_OPERATION: &str = "unknown-op";

/// Placeholder for a GraphQL call with no variables
pub const NO_VARIABLES: &str = "no-vars";

const GRAPHQL_PREFIX: &str = "gql";
const REST_PREFIX: &str = "rest";

/// Opaque identity of a class of API calls
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Arc<str>);

impl Fingerprint {
    /// Wrap an existing fingerprint string
    pub fn from_string<S: Into<String>>(raw: S) -> Self {
        Self(Arc::from(raw.into()))
    }

    /// Get the fingerprint as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this fingerprint identifies a GraphQL call
    pub fn is_graphql(&self) -> bool {
        self.0.starts_with("gql|")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets maps keyed by fingerprint be queried with a plain `&str`.
impl Borrow<str> for Fingerprint {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Parts a fingerprint is assembled from
#[derive(Debug, Clone, Copy)]
pub struct FingerprintParts<'a> {
    /// HTTP method, any case
    pub method: &'a str,
    /// URL path without query string
    pub path: &'a str,
    /// GraphQL classification of the call
    pub graphql: &'a GraphqlMeta,
    /// Structural hash of the request payload
    pub request_shape_hash: &'a str,
    /// Structural hash of the response payload
    pub response_shape_hash: &'a str,
}

/// Join the parts into a fingerprint
pub fn build_fingerprint(parts: &FingerprintParts<'_>) -> Fingerprint {
    let method = parts.method.to_ascii_uppercase();

    let joined = if parts.graphql.is_graphql {
        [
            GRAPHQL_PREFIX,
            method.as_str(),
            parts.path,
            parts
                .graphql
                .operation_name
                .as_deref()
                .unwrap_or(UNKNOWN_OPERATION),
            parts
                .graphql
                .variables_shape_hash
                .as_deref()
                .unwrap_or(NO_VARIABLES),
        ]
        .join("|")
    } else {
        [
            REST_PREFIX,
            method.as_str(),
            parts.path,
            parts.request_shape_hash,
            parts.response_shape_hash,
        ]
        .join("|")
    };

    Fingerprint::from_string(joined)
}
