//! Tool-call argument normalization.
//!
//! Models sometimes return the argument object encoded as a JSON string,
//! occasionally several times over. Each string layer is unwrapped until an
//! object appears, with a hard cap on the number of layers.

use aiq_core::error::{ArgumentError, excerpt};
use serde_json::{Map, Value};

/// Maximum string layers peeled before giving up.
pub const MAX_UNWRAP_DEPTH: usize = 10;

/// Recover the argument object from a raw tool-call payload.
pub fn parse_arguments(raw: &str) -> Result<Map<String, Value>, ArgumentError> {
    let mut current = raw.to_string();

    for depth in 0..=MAX_UNWRAP_DEPTH {
        let trimmed = current.trim();
        if trimmed.is_empty() {
            return Err(ArgumentError::Empty { excerpt: excerpt(raw) });
        }

        let value: Value = serde_json::from_str(trimmed).map_err(|e| ArgumentError::InvalidJson {
            reason: e.to_string(),
            excerpt: excerpt(raw),
        })?;

        match value {
            Value::Object(map) => return Ok(map),
            Value::String(inner) if depth < MAX_UNWRAP_DEPTH => current = inner,
            Value::String(_) => break,
            other => {
                return Err(ArgumentError::NotAnObject {
                    found: json_kind(&other),
                    excerpt: excerpt(raw),
                });
            }
        }
    }

    Err(ArgumentError::TooDeep {
        depth: MAX_UNWRAP_DEPTH,
        excerpt: excerpt(raw),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
