//! Stable hashing of shapes and JSON values
//!
//! Values are serialized with object keys sorted at every level, then reduced
//! with 32-bit FNV-1a over UTF-16 code units and rendered as eight lowercase
//! hex digits. The digest is an identity hint: equal hashes mean "probably
//! the same shape", nothing stronger.

use serde_json::Value;

use crate::shape::ShapeNode;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Serialize a JSON value with object keys sorted lexicographically
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_stable(&map[key.as_str()], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// 32-bit FNV-1a over the UTF-16 code units of `input`
pub fn fnv1a_utf16(input: &str) -> u32 {
    input.encode_utf16().fold(FNV_OFFSET_BASIS, |hash, unit| {
        (hash ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
    })
}

/// Hash an arbitrary JSON value to eight hex digits
pub fn hash_value(value: &Value) -> String {
    format!("{:08x}", fnv1a_utf16(&stable_stringify(value)))
}

/// Hash a shape node to eight hex digits
pub fn hash_shape(node: &ShapeNode) -> String {
    let value = serde_json::to_value(node).unwrap_or(Value::Null);
    hash_value(&value)
}
