//! Structural shape inference over JSON values
//!
//! A [`ShapeNode`] describes the structure of a value rather than its
//! contents. Arrays always collapse to a single merged element shape;
//! heterogeneous elements fold into an `unknown` node carrying one merged
//! variant per kind.
//!
//! # Example
//!
//! ```rust
//! use reasonkit_apiscope::shape::{infer_shape, ShapeKind};
//! use serde_json::json;
//!
//! let shape = infer_shape(&json!([{"id": 1}, {"id": 2, "name": "x"}]));
//! let element = shape.element().unwrap();
//! assert_eq!(element.kind(), ShapeKind::Object);
//! assert_eq!(element.properties().unwrap().len(), 2);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;

/// Maximum characters kept in a string sample
pub const SAMPLE_MAX_CHARS: usize = 80;

/// Nesting depth beyond which values are described as `unknown`
pub const MAX_SHAPE_DEPTH: usize = 64;

/// Kind tag of a shape node
///
/// The declaration order is the order variants appear in a merged
/// `unknown` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// JSON null
    Null,
    /// true / false
    Boolean,
    /// Any JSON number
    Number,
    /// Any JSON string
    String,
    /// Array with a merged element shape
    Array,
    /// Object with per-property shapes
    Object,
    /// Absent value, or a merge of several kinds
    Unknown,
}

/// Structural descriptor of a runtime value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShapeNode {
    /// JSON null
    Null,
    /// Boolean value
    Boolean {
        /// Observed value, when every merged observation agreed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample: Option<bool>,
    },
    /// Numeric value
    Number {
        /// Observed value, when every merged observation agreed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample: Option<Number>,
    },
    /// String value
    String {
        /// Truncated observed value, when every merged observation agreed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample: Option<String>,
    },
    /// Array; all elements merged into one shape
    Array {
        /// Merged element shape
        element: Box<ShapeNode>,
    },
    /// Object with named properties
    Object {
        /// Property shapes keyed by name
        properties: BTreeMap<String, ShapeNode>,
    },
    /// Absent value or heterogeneous merge
    Unknown {
        /// One merged node per observed kind
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variants: Option<Vec<ShapeNode>>,
    },
}

impl ShapeNode {
    /// A bare `unknown` node with no variants
    pub fn unknown() -> Self {
        ShapeNode::Unknown { variants: None }
    }

    /// Kind tag of this node
    pub fn kind(&self) -> ShapeKind {
        match self {
            ShapeNode::Null => ShapeKind::Null,
            ShapeNode::Boolean { .. } => ShapeKind::Boolean,
            ShapeNode::Number { .. } => ShapeKind::Number,
            ShapeNode::String { .. } => ShapeKind::String,
            ShapeNode::Array { .. } => ShapeKind::Array,
            ShapeNode::Object { .. } => ShapeKind::Object,
            ShapeNode::Unknown { .. } => ShapeKind::Unknown,
        }
    }

    /// Element shape if this is an array
    pub fn element(&self) -> Option<&ShapeNode> {
        match self {
            ShapeNode::Array { element } => Some(element),
            _ => None,
        }
    }

    /// Property shapes if this is an object
    pub fn properties(&self) -> Option<&BTreeMap<String, ShapeNode>> {
        match self {
            ShapeNode::Object { properties } => Some(properties),
            _ => None,
        }
    }

    /// Variants if this is a heterogeneous `unknown` node
    pub fn variants(&self) -> Option<&[ShapeNode]> {
        match self {
            ShapeNode::Unknown {
                variants: Some(variants),
            } => Some(variants),
            _ => None,
        }
    }

    /// Copy of this shape with every sample removed
    pub fn structure(&self) -> ShapeNode {
        match self {
            ShapeNode::Null => ShapeNode::Null,
            ShapeNode::Boolean { .. } => ShapeNode::Boolean { sample: None },
            ShapeNode::Number { .. } => ShapeNode::Number { sample: None },
            ShapeNode::String { .. } => ShapeNode::String { sample: None },
            ShapeNode::Array { element } => ShapeNode::Array {
                element: Box::new(element.structure()),
            },
            ShapeNode::Object { properties } => ShapeNode::Object {
                properties: properties
                    .iter()
                    .map(|(name, node)| (name.clone(), node.structure()))
                    .collect(),
            },
            ShapeNode::Unknown { variants } => ShapeNode::Unknown {
                variants: variants
                    .as_ref()
                    .map(|nodes| nodes.iter().map(ShapeNode::structure).collect()),
            },
        }
    }
}

/// Infer the shape of a JSON value
pub fn infer_shape(value: &Value) -> ShapeNode {
    infer_at(value, 0)
}

/// Infer the shape of a possibly-absent value; absence maps to `unknown`
pub fn infer_optional_shape(value: Option<&Value>) -> ShapeNode {
    value.map(infer_shape).unwrap_or_else(ShapeNode::unknown)
}

fn infer_at(value: &Value, depth: usize) -> ShapeNode {
    if depth >= MAX_SHAPE_DEPTH {
        return ShapeNode::unknown();
    }

    match value {
        Value::Null => ShapeNode::Null,
        Value::Bool(b) => ShapeNode::Boolean { sample: Some(*b) },
        Value::Number(n) => ShapeNode::Number {
            sample: Some(n.clone()),
        },
        Value::String(s) => ShapeNode::String {
            sample: Some(truncate_chars(s, SAMPLE_MAX_CHARS)),
        },
        Value::Array(items) => ShapeNode::Array {
            element: Box::new(merge_shapes(
                items.iter().map(|item| infer_at(item, depth + 1)),
            )),
        },
        Value::Object(map) => ShapeNode::Object {
            properties: map
                .iter()
                .map(|(name, item)| (name.clone(), infer_at(item, depth + 1)))
                .collect(),
        },
    }
}

/// Merge any number of shapes into one
///
/// The result depends only on the multiset of inputs, never on their order.
/// An empty input yields a bare `unknown`.
pub fn merge_shapes<I>(nodes: I) -> ShapeNode
where
    I: IntoIterator<Item = ShapeNode>,
{
    let mut groups: BTreeMap<ShapeKind, Vec<ShapeNode>> = BTreeMap::new();
    for node in nodes {
        flatten_into(node, &mut groups);
    }

    let mut merged: Vec<ShapeNode> = groups.into_values().map(merge_same_kind).collect();
    match merged.len() {
        0 => ShapeNode::unknown(),
        1 => merged.pop().unwrap_or_else(ShapeNode::unknown),
        _ => ShapeNode::Unknown {
            variants: Some(merged),
        },
    }
}

// Variant-carrying unknowns are expanded so merging stays associative.
fn flatten_into(node: ShapeNode, groups: &mut BTreeMap<ShapeKind, Vec<ShapeNode>>) {
    match node {
        ShapeNode::Unknown {
            variants: Some(variants),
        } => {
            for variant in variants {
                flatten_into(variant, groups);
            }
        }
        other => groups.entry(other.kind()).or_default().push(other),
    }
}

fn merge_same_kind(nodes: Vec<ShapeNode>) -> ShapeNode {
    let kind = match nodes.first() {
        Some(first) => first.kind(),
        None => return ShapeNode::unknown(),
    };

    match kind {
        ShapeKind::Null => ShapeNode::Null,
        ShapeKind::Boolean => ShapeNode::Boolean {
            sample: common_sample(nodes.into_iter().map(|node| match node {
                ShapeNode::Boolean { sample } => sample,
                _ => None,
            })),
        },
        ShapeKind::Number => ShapeNode::Number {
            sample: common_sample(nodes.into_iter().map(|node| match node {
                ShapeNode::Number { sample } => sample,
                _ => None,
            })),
        },
        ShapeKind::String => ShapeNode::String {
            sample: common_sample(nodes.into_iter().map(|node| match node {
                ShapeNode::String { sample } => sample,
                _ => None,
            })),
        },
        ShapeKind::Array => ShapeNode::Array {
            element: Box::new(merge_shapes(nodes.into_iter().filter_map(
                |node| match node {
                    ShapeNode::Array { element } => Some(*element),
                    _ => None,
                },
            ))),
        },
        ShapeKind::Object => {
            let mut by_name: BTreeMap<String, Vec<ShapeNode>> = BTreeMap::new();
            for node in nodes {
                if let ShapeNode::Object { properties } = node {
                    for (name, shape) in properties {
                        by_name.entry(name).or_default().push(shape);
                    }
                }
            }
            ShapeNode::Object {
                properties: by_name
                    .into_iter()
                    .map(|(name, shapes)| (name, merge_shapes(shapes)))
                    .collect(),
            }
        }
        ShapeKind::Unknown => ShapeNode::unknown(),
    }
}

/// A sample survives a merge only if every merged node carried the same one
fn common_sample<T: PartialEq>(samples: impl IntoIterator<Item = Option<T>>) -> Option<T> {
    let mut iter = samples.into_iter();
    let first = iter.next().flatten()?;
    for sample in iter {
        if sample.as_ref() != Some(&first) {
            return None;
        }
    }
    Some(first)
}

pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => s[..cut].to_string(),
        None => s.to_string(),
    }
}
