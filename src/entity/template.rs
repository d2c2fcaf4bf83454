//! Placeholder rendering for entity templates

use crate::error::{BridgeError, Result};
use serde_json::{Map, Value};

/// Render a template by replacing `{key}` placeholder leaves with values
/// from the payload.
///
/// A placeholder is a string leaf whose entire content is `{key}`. The
/// replacement keeps the payload value's JSON type, so `"{level}"` against
/// `{"level": 0.42}` renders as the number `0.42`. Keys absent from the
/// payload render as `null`. Strings that are not pure placeholders pass
/// through untouched, which also makes rendering idempotent.
pub fn render(template: &Value, payload: &Value) -> Result<Value> {
    let Value::Object(_) = template else {
        return Err(BridgeError::Template(
            "entity template root must be a JSON object".to_string(),
        ));
    };

    let data = match payload {
        Value::Object(map) => map,
        _ => {
            return Err(BridgeError::Template(
                "payload must be a JSON object".to_string(),
            ))
        }
    };

    Ok(render_value(template, data))
}

fn render_value(value: &Value, data: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => match placeholder_key(s) {
            Some(key) => data.get(key).cloned().unwrap_or(Value::Null),
            None => value.clone(),
        },
        Value::Array(arr) => Value::Array(arr.iter().map(|v| render_value(v, data)).collect()),
        Value::Object(obj) => {
            let mut rendered = Map::new();
            for (key, val) in obj {
                rendered.insert(key.clone(), render_value(val, data));
            }
            Value::Object(rendered)
        }
        // Numbers, booleans, null are passed through as-is
        _ => value.clone(),
    }
}

/// Extract `key` from a string that is exactly `{key}`, rejecting strings
/// with embedded placeholders or extra text.
fn placeholder_key(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains('{') || inner.contains('}') {
        return None;
    }
    Some(inner)
}
