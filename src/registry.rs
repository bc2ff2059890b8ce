//! Known-API registry and rule matching
//!
//! The registry itself is maintained elsewhere; this module only reads its
//! `match` rules. A rule matches a call when every field it specifies
//! matches. Unspecified fields are "don't care", so an empty rule matches
//! every call.
//!
//! | field                | comparison                                   |
//! |----------------------|----------------------------------------------|
//! | `method`             | case-insensitive equality                    |
//! | `path`               | equality, or `*` glob (any run of chars)     |
//! | `operationName`      | equality                                     |
//! | `variablesShapeHash` | substring of the call's full fingerprint     |

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{ApiScopeError, ApiScopeResult};

/// Declarative match rule for a known API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XApiMatchRule {
    /// HTTP method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Path, possibly containing `*` wildcards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// GraphQL operation name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Variables shape hash, matched as a fingerprint substring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables_shape_hash: Option<String>,
}

/// One registry entry as published by the registry document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnownApiDefinition {
    /// Match rule; entries without one are never matched
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_rule: Option<XApiMatchRule>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Which section of a grouped registry an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiGroup {
    /// Read-only calls
    Query,
    /// Mutating calls
    Action,
    /// Entry from a flat registry
    Ungrouped,
}

/// The call being checked against the registry
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    /// HTTP method
    pub method: &'a str,
    /// URL path
    pub path: &'a str,
    /// GraphQL operation name, if any
    pub operation_name: Option<&'a str>,
    /// Full fingerprint string of the call
    pub fingerprint: &'a str,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    group: ApiGroup,
    rule: XApiMatchRule,
    path_pattern: Option<Regex>,
}

impl CompiledRule {
    fn compile(name: String, group: ApiGroup, rule: XApiMatchRule) -> ApiScopeResult<Self> {
        let path_pattern = match rule.path.as_deref() {
            Some(path) if path.contains('*') => {
                Some(compile_glob(path).map_err(|e| ApiScopeError::InvalidRule {
                    name: name.clone(),
                    reason: e.to_string(),
                })?)
            }
            _ => None,
        };
        Ok(Self {
            name,
            group,
            rule,
            path_pattern,
        })
    }

    fn matches(&self, input: &MatchInput<'_>) -> bool {
        if let Some(method) = &self.rule.method {
            if !method.eq_ignore_ascii_case(input.method) {
                return false;
            }
        }

        if let Some(path) = &self.rule.path {
            let path_ok = match &self.path_pattern {
                Some(pattern) => pattern.is_match(input.path),
                None => path == input.path,
            };
            if !path_ok {
                return false;
            }
        }

        if let Some(operation) = &self.rule.operation_name {
            if input.operation_name != Some(operation.as_str()) {
                return false;
            }
        }

        if let Some(hash) = &self.rule.variables_shape_hash {
            if !input.fingerprint.contains(hash.as_str()) {
                return false;
            }
        }

        true
    }
}

/// `*` becomes `.*`; everything else is matched literally
fn compile_glob(glob: &str) -> Result<Regex, regex::Error> {
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
}

/// Read-only collection of known-API match rules
#[derive(Debug, Clone, Default)]
pub struct KnownApiRegistry {
    entries: Vec<CompiledRule>,
}

impl KnownApiRegistry {
    /// A registry that knows nothing; every call is unknown
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from bare named rules
    pub fn from_rules<I, S>(rules: I) -> ApiScopeResult<Self>
    where
        I: IntoIterator<Item = (S, XApiMatchRule)>,
        S: Into<String>,
    {
        let entries = rules
            .into_iter()
            .map(|(name, rule)| CompiledRule::compile(name.into(), ApiGroup::Ungrouped, rule))
            .collect::<ApiScopeResult<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Build from a flat `name -> definition` map
    pub fn from_flat(apis: BTreeMap<String, KnownApiDefinition>) -> ApiScopeResult<Self> {
        let mut registry = Self::empty();
        registry.extend(ApiGroup::Ungrouped, apis)?;
        Ok(registry)
    }

    /// Build from `query` and `action` groups
    pub fn from_grouped(
        query: BTreeMap<String, KnownApiDefinition>,
        action: BTreeMap<String, KnownApiDefinition>,
    ) -> ApiScopeResult<Self> {
        let mut registry = Self::empty();
        registry.extend(ApiGroup::Query, query)?;
        registry.extend(ApiGroup::Action, action)?;
        Ok(registry)
    }

    /// Build from a registry JSON document, flat or `{query, action}` grouped
    ///
    /// # Errors
    ///
    /// Returns `InvalidRegistry` when the document is not an object or an
    /// entry does not decode, and `InvalidRule` when a path glob is unusable.
    pub fn from_json(document: &Value) -> ApiScopeResult<Self> {
        let top = document.as_object().ok_or_else(|| {
            ApiScopeError::InvalidRegistry("registry document must be an object".to_string())
        })?;

        let grouped = !top.is_empty()
            && top.iter().all(|(key, section)| {
                (key == "query" || key == "action")
                    && section.is_object()
                    && section.get("match").is_none()
            });

        let decode = |section: &Value| -> ApiScopeResult<BTreeMap<String, KnownApiDefinition>> {
            serde_json::from_value(section.clone())
                .map_err(|e| ApiScopeError::InvalidRegistry(e.to_string()))
        };

        if grouped {
            let empty = Value::Object(Default::default());
            let query = decode(top.get("query").unwrap_or(&empty))?;
            let action = decode(top.get("action").unwrap_or(&empty))?;
            Self::from_grouped(query, action)
        } else {
            Self::from_flat(decode(document)?)
        }
    }

    fn extend(
        &mut self,
        group: ApiGroup,
        apis: BTreeMap<String, KnownApiDefinition>,
    ) -> ApiScopeResult<()> {
        for (name, definition) in apis {
            match definition.match_rule {
                Some(rule) => self.entries.push(CompiledRule::compile(name, group, rule)?),
                None => debug!(api = %name, "registry entry has no match rule; skipping"),
            }
        }
        Ok(())
    }

    /// Number of matchable entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no matchable entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name and group of the first entry matching the call
    pub fn matching_api(&self, input: &MatchInput<'_>) -> Option<(&str, ApiGroup)> {
        self.entries
            .iter()
            .find(|entry| entry.matches(input))
            .map(|entry| (entry.name.as_str(), entry.group))
    }
}

/// Whether any registry rule matches the call
pub fn is_known_api_record(registry: &KnownApiRegistry, input: &MatchInput<'_>) -> bool {
    registry.matching_api(input).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input<'a>(method: &'a str, path: &'a str, op: Option<&'a str>, fp: &'a str) -> MatchInput<'a> {
        MatchInput {
            method,
            path,
            operation_name: op,
            fingerprint: fp,
        }
    }

    fn create_tweet_registry() -> KnownApiRegistry {
        KnownApiRegistry::from_rules([(
            "createTweet",
            XApiMatchRule {
                method: Some("POST".to_string()),
                path: Some("/i/api/graphql/*/CreateTweet".to_string()),
                operation_name: Some("CreateTweet".to_string()),
                variables_shape_hash: None,
            },
        )])
        .unwrap()
    }

    #[test]
    fn test_wildcard_path_matches_any_query_id() {
        let registry = create_tweet_registry();
        for path in [
            "/i/api/graphql/y362cgN7cwMppu6Hy3JzrQ/CreateTweet",
            "/i/api/graphql/anythingElse/CreateTweet",
        ] {
            assert!(is_known_api_record(
                &registry,
                &input("POST", path, Some("CreateTweet"), "gql|POST|x|CreateTweet|h")
            ));
        }
        assert!(!is_known_api_record(
            &registry,
            &input("POST", "/i/api/graphql/abc/DeleteTweet", Some("CreateTweet"), "")
        ));
        assert!(!is_known_api_record(
            &registry,
            &input("POST", "/i/api/graphql/abc/CreateTweet", Some("DeleteTweet"), "")
        ));
    }

    #[test]
    fn test_method_case_insensitive() {
        let registry = create_tweet_registry();
        assert!(is_known_api_record(
            &registry,
            &input("post", "/i/api/graphql/q/CreateTweet", Some("CreateTweet"), "")
        ));
        assert!(!is_known_api_record(
            &registry,
            &input("GET", "/i/api/graphql/q/CreateTweet", Some("CreateTweet"), "")
        ));
    }

    #[test]
    fn test_empty_rule_matches_everything() {
        let registry = KnownApiRegistry::from_rules([("all", XApiMatchRule::default())]).unwrap();
        assert!(is_known_api_record(
            &registry,
            &input("DELETE", "/anything", None, "rest|DELETE|/anything|a|b")
        ));
    }

    #[test]
    fn test_empty_registry_matches_nothing() {
        let registry = KnownApiRegistry::empty();
        assert!(registry.is_empty());
        assert!(!is_known_api_record(&registry, &input("GET", "/", None, "")));
    }

    #[test]
    fn test_variables_hash_is_substring_check() {
        let registry = KnownApiRegistry::from_rules([(
            "timeline",
            XApiMatchRule {
                variables_shape_hash: Some("deadbeef".to_string()),
                ..Default::default()
            },
        )])
        .unwrap();
        assert!(is_known_api_record(
            &registry,
            &input("GET", "/p", Some("HomeTimeline"), "gql|GET|/p|HomeTimeline|deadbeef")
        ));
        assert!(!is_known_api_record(
            &registry,
            &input("GET", "/p", Some("HomeTimeline"), "gql|GET|/p|HomeTimeline|cafebabe")
        ));
    }

    #[test]
    fn test_glob_escapes_metacharacters() {
        let registry = KnownApiRegistry::from_rules([(
            "settings",
            XApiMatchRule {
                path: Some("/1.1/account/*.json".to_string()),
                ..Default::default()
            },
        )])
        .unwrap();
        assert!(is_known_api_record(
            &registry,
            &input("GET", "/1.1/account/settings.json", None, "")
        ));
        assert!(!is_known_api_record(
            &registry,
            &input("GET", "/1x1/account/settings.json", None, "")
        ));
        assert!(!is_known_api_record(
            &registry,
            &input("GET", "/1.1/account/settings.jsonp", None, "")
        ));
    }

    #[test]
    fn test_exact_path_without_wildcard() {
        let registry = KnownApiRegistry::from_rules([(
            "exact",
            XApiMatchRule {
                path: Some("/a/b".to_string()),
                ..Default::default()
            },
        )])
        .unwrap();
        assert!(is_known_api_record(&registry, &input("GET", "/a/b", None, "")));
        assert!(!is_known_api_record(&registry, &input("GET", "/a/b/c", None, "")));
    }

    #[test]
    fn test_from_json_grouped() {
        let doc = json!({
            "query": {
                "tweetDetail": {"match": {"method": "GET", "operationName": "TweetDetail"}},
                "docsOnly": {"description": "no match rule"}
            },
            "action": {
                "createTweet": {"match": {"method": "POST", "path": "/i/api/graphql/*/CreateTweet"}}
            }
        });
        let registry = KnownApiRegistry::from_json(&doc).unwrap();
        assert_eq!(registry.len(), 2);

        let hit = registry.matching_api(&input("GET", "/x", Some("TweetDetail"), ""));
        assert_eq!(hit, Some(("tweetDetail", ApiGroup::Query)));

        let hit = registry.matching_api(&input("POST", "/i/api/graphql/q/CreateTweet", None, ""));
        assert_eq!(hit, Some(("createTweet", ApiGroup::Action)));
    }

    #[test]
    fn test_from_json_flat() {
        let doc = json!({
            "query": {"match": {"operationName": "SearchTimeline"}},
            "userByScreenName": {"match": {"operationName": "UserByScreenName"}}
        });
        let registry = KnownApiRegistry::from_json(&doc).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.matching_api(&input("GET", "/", Some("SearchTimeline"), "")),
            Some(("query", ApiGroup::Ungrouped))
        );
    }

    #[test]
    fn test_from_json_rejects_bad_documents() {
        assert!(matches!(
            KnownApiRegistry::from_json(&json!([1, 2])),
            Err(ApiScopeError::InvalidRegistry(_))
        ));
        assert!(matches!(
            KnownApiRegistry::from_json(&json!({"x": {"match": {"method": 5}}})),
            Err(ApiScopeError::InvalidRegistry(_))
        ));
    }
}
