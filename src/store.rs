//! Deduplicating store of unknown API observations
//!
//! Records are keyed by fingerprint. Every observation of an unknown call is
//! upserted: the first creates a record with `hits = 1`, later ones replace
//! the observation fields, keep `first_seen`, refresh `last_seen` and bump
//! `hits`. Calls matched by the known-API registry are never stored.
//!
//! The store owns its records outright. Every accessor hands out clones, so
//! callers cannot mutate stored state.
//!
//! # Example
//!
//! ```rust
//! use reasonkit_apiscope::store::UnknownApiStore;
//!
//! let store = UnknownApiStore::without_registry();
//! assert!(store.list().is_empty());
//! assert_eq!(store.to_json(false), "[]");
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::fingerprint::Fingerprint;
use crate::registry::{KnownApiRegistry, MatchInput};
use crate::shape::ShapeNode;

/// One observation of a call, ready to be upserted
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInput {
    /// Fingerprint; becomes the record key
    pub key: Fingerprint,
    /// Uppercased HTTP method
    pub method: String,
    /// URL path
    pub path: String,
    /// Full request URL
    pub url: String,
    /// Response status, absent when the call failed before a response
    pub status: Option<u16>,
    /// GraphQL classification
    pub is_graphql: bool,
    /// GraphQL operation name
    pub operation_name: Option<String>,
    /// Hash of the masked GraphQL variables
    pub variables_shape_hash: Option<String>,
    /// Shape of the request payload
    pub request_shape: ShapeNode,
    /// Shape of the response payload
    pub response_shape: ShapeNode,
    /// Redacted request payload
    pub request_sample: Option<Value>,
    /// Redacted response payload
    pub response_sample: Option<Value>,
    /// Redacted request headers
    pub headers: BTreeMap<String, String>,
    /// Error reported by the intercepted call
    pub error: Option<String>,
}

/// Stored record for one unknown API shape class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownApiRecord {
    /// Fingerprint of the call class
    pub key: Fingerprint,
    /// Uppercased HTTP method
    pub method: String,
    /// URL path
    pub path: String,
    /// Full URL of the latest observation
    pub url: String,
    /// Latest response status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// GraphQL classification
    pub is_graphql: bool,
    /// GraphQL operation name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Hash of the masked GraphQL variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables_shape_hash: Option<String>,
    /// Shape of the latest request payload
    pub request_shape: ShapeNode,
    /// Shape of the latest response payload
    pub response_shape: ShapeNode,
    /// Redacted latest request payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_sample: Option<Value>,
    /// Redacted latest response payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_sample: Option<Value>,
    /// Redacted latest request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Error of the latest observation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// First time this shape class was seen
    pub first_seen: DateTime<Utc>,
    /// Most recent observation
    pub last_seen: DateTime<Utc>,
    /// Number of observations
    pub hits: u64,
}

impl UnknownApiRecord {
    fn first_observation(input: RecordInput, now: DateTime<Utc>) -> Self {
        Self {
            key: input.key,
            method: input.method,
            path: input.path,
            url: input.url,
            status: input.status,
            is_graphql: input.is_graphql,
            operation_name: input.operation_name,
            variables_shape_hash: input.variables_shape_hash,
            request_shape: input.request_shape,
            response_shape: input.response_shape,
            request_sample: input.request_sample,
            response_sample: input.response_sample,
            headers: input.headers,
            error: input.error,
            first_seen: now,
            last_seen: now,
            hits: 1,
        }
    }

    /// Latest observation wins; identity and history fields are kept
    fn merge(&mut self, input: RecordInput, now: DateTime<Utc>) {
        let first_seen = self.first_seen;
        let last_seen = self.last_seen.max(now);
        let hits = self.hits.saturating_add(1);

        *self = Self::first_observation(input, now);
        self.first_seen = first_seen;
        self.last_seen = last_seen;
        self.hits = hits;
    }
}

/// Search over record keys; case-insensitive substring, match-any
#[derive(Debug, Clone)]
pub enum SearchQuery<'a> {
    /// A single substring
    One(&'a str),
    /// Any of several substrings
    Any(Vec<&'a str>),
}

impl SearchQuery<'_> {
    fn matches(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        match self {
            SearchQuery::One(text) => key.contains(&text.to_lowercase()),
            SearchQuery::Any(texts) => texts
                .iter()
                .any(|text| key.contains(&text.to_lowercase())),
        }
    }
}

impl<'a> From<&'a str> for SearchQuery<'a> {
    fn from(text: &'a str) -> Self {
        SearchQuery::One(text)
    }
}

impl<'a> From<&'a String> for SearchQuery<'a> {
    fn from(text: &'a String) -> Self {
        SearchQuery::One(text.as_str())
    }
}

impl<'a> From<Vec<&'a str>> for SearchQuery<'a> {
    fn from(texts: Vec<&'a str>) -> Self {
        SearchQuery::Any(texts)
    }
}

impl<'a> From<&'a [&'a str]> for SearchQuery<'a> {
    fn from(texts: &'a [&'a str]) -> Self {
        SearchQuery::Any(texts.to_vec())
    }
}

impl<'a> From<&'a [String]> for SearchQuery<'a> {
    fn from(texts: &'a [String]) -> Self {
        SearchQuery::Any(texts.iter().map(String::as_str).collect())
    }
}

impl<'a, const N: usize> From<[&'a str; N]> for SearchQuery<'a> {
    fn from(texts: [&'a str; N]) -> Self {
        SearchQuery::Any(texts.to_vec())
    }
}

/// Statistics about store usage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Distinct unknown shape classes currently stored
    pub records: usize,
    /// Upserts attempted since creation (or last clear)
    pub observations: u64,
    /// Upserts that created a record
    pub inserts: u64,
    /// Upserts that merged into an existing record
    pub updates: u64,
    /// Upserts skipped because the registry knew the call
    pub known_skipped: u64,
}

#[derive(Default)]
struct StoreStatsCounters {
    observations: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    known_skipped: AtomicU64,
}

impl StoreStatsCounters {
    fn reset(&self) {
        self.observations.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.updates.store(0, Ordering::Relaxed);
        self.known_skipped.store(0, Ordering::Relaxed);
    }
}

/// Deduplicating map of unknown API records
///
/// Each upsert runs under one write guard, so concurrent observations of
/// the same fingerprint serialize cleanly.
pub struct UnknownApiStore {
    records: RwLock<HashMap<Fingerprint, UnknownApiRecord>>,
    registry: Arc<KnownApiRegistry>,
    stats: StoreStatsCounters,
}

impl UnknownApiStore {
    /// Create a store that skips calls known to `registry`
    pub fn new(registry: Arc<KnownApiRegistry>) -> Self {
        info!(known_apis = registry.len(), "Creating unknown API store");
        Self {
            records: RwLock::new(HashMap::new()),
            registry,
            stats: StoreStatsCounters::default(),
        }
    }

    /// Create a store with an empty registry; every call is unknown
    pub fn without_registry() -> Self {
        Self::new(Arc::new(KnownApiRegistry::empty()))
    }

    /// Registry consulted by [`upsert`](Self::upsert)
    pub fn registry(&self) -> &KnownApiRegistry {
        &self.registry
    }

    /// Insert or merge an observation
    ///
    /// Returns `None` without writing anything when the call is known;
    /// otherwise a copy of the record after the write.
    #[instrument(skip(self, input), fields(key = %input.key))]
    pub fn upsert(&self, input: RecordInput) -> Option<UnknownApiRecord> {
        self.stats.observations.fetch_add(1, Ordering::Relaxed);

        let match_input = MatchInput {
            method: &input.method,
            path: &input.path,
            operation_name: input.operation_name.as_deref(),
            fingerprint: input.key.as_str(),
        };
        if let Some((api, group)) = self.registry.matching_api(&match_input) {
            self.stats.known_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(api, ?group, "Known API; not stored");
            return None;
        }

        let now = Utc::now();
        let mut records = self.records.write();
        let record = match records.entry(input.key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().merge(input, now);
                self.stats.updates.fetch_add(1, Ordering::Relaxed);
                debug!(hits = entry.get().hits, "Updated unknown API record");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                self.stats.inserts.fetch_add(1, Ordering::Relaxed);
                info!(
                    method = %input.method,
                    path = %input.path,
                    operation = input.operation_name.as_deref().unwrap_or("-"),
                    "Discovered unknown API"
                );
                entry
                    .insert(UnknownApiRecord::first_observation(input, now))
                    .clone()
            }
        };
        Some(record)
    }

    /// Get a record by key
    pub fn get(&self, key: &str) -> Option<UnknownApiRecord> {
        self.records.read().get(key).cloned()
    }

    /// All records, most recently seen first
    pub fn list(&self) -> Vec<UnknownApiRecord> {
        let mut result: Vec<_> = self.records.read().values().cloned().collect();
        sort_by_recency(&mut result);
        result
    }

    /// Records whose key contains the text (or any of the texts),
    /// ignoring case; most recently seen first
    pub fn search<'q, Q>(&self, query: Q) -> Vec<UnknownApiRecord>
    where
        Q: Into<SearchQuery<'q>>,
    {
        let query = query.into();
        let mut result: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|record| query.matches(record.key.as_str()))
            .cloned()
            .collect();
        sort_by_recency(&mut result);
        result
    }

    /// JSON array of [`list`](Self::list); `"[]"` if encoding fails
    pub fn to_json(&self, pretty: bool) -> String {
        let records = self.list();
        let encoded = if pretty {
            serde_json::to_string_pretty(&records)
        } else {
            serde_json::to_string(&records)
        };
        encoded.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to encode unknown API records");
            "[]".to_string()
        })
    }

    /// Drop every record and reset statistics
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let mut records = self.records.write();
        let count = records.len();
        records.clear();
        self.stats.reset();
        info!("Cleared {} unknown API records", count);
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Get store statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            records: self.len(),
            observations: self.stats.observations.load(Ordering::Relaxed),
            inserts: self.stats.inserts.load(Ordering::Relaxed),
            updates: self.stats.updates.load(Ordering::Relaxed),
            known_skipped: self.stats.known_skipped.load(Ordering::Relaxed),
        }
    }
}

impl Default for UnknownApiStore {
    fn default() -> Self {
        Self::without_registry()
    }
}

fn sort_by_recency(records: &mut [UnknownApiRecord]) {
    records.sort_by(|a, b| {
        b.last_seen
            .cmp(&a.last_seen)
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Wrapper for using UnknownApiStore in Arc contexts
pub type SharedUnknownApiStore = Arc<UnknownApiStore>;

/// Create a new shared store backed by `registry`
pub fn shared_store(registry: Arc<KnownApiRegistry>) -> SharedUnknownApiStore {
    Arc::new(UnknownApiStore::new(registry))
}
