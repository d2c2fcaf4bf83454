//! NGSI-LD attribute classification and payload cleaning

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute kinds the broker understands. Anything that arrives untagged
/// is wrapped as a plain `Property`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NgsiAttributeKind {
    Property,
    GeoProperty,
    Relationship,
}

impl NgsiAttributeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NgsiAttributeKind::Property => "Property",
            NgsiAttributeKind::GeoProperty => "GeoProperty",
            NgsiAttributeKind::Relationship => "Relationship",
        }
    }
}

/// Decide the NGSI-LD kind of an attribute value.
///
/// Tagged objects keep their declared kind. Untagged objects are inspected
/// for the structural hints the broker itself uses: an `object` member means
/// a Relationship, a `coordinates` member (directly or under `value`) means
/// a GeoProperty. Everything else is a Property.
pub fn classify(value: &Value) -> NgsiAttributeKind {
    let Value::Object(obj) = value else {
        return NgsiAttributeKind::Property;
    };

    if let Some(Value::String(tag)) = obj.get("type") {
        match tag.as_str() {
            "GeoProperty" => return NgsiAttributeKind::GeoProperty,
            "Relationship" => return NgsiAttributeKind::Relationship,
            "Property" => return NgsiAttributeKind::Property,
            _ => {}
        }
    }

    if obj.contains_key("object") {
        return NgsiAttributeKind::Relationship;
    }

    if obj.contains_key("coordinates") {
        return NgsiAttributeKind::GeoProperty;
    }
    if let Some(Value::Object(inner)) = obj.get("value") {
        if inner.contains_key("coordinates") {
            return NgsiAttributeKind::GeoProperty;
        }
    }

    NgsiAttributeKind::Property
}

/// Normalize a rendered entity into a document the broker accepts.
///
/// `id`, `type` and `@context` pass through verbatim. Attributes rendered
/// to `null` are dropped entirely. Names listed in `exceptions` pass
/// through without wrapping. Values already shaped as NGSI-LD attributes
/// (tagged, or structurally a Relationship/GeoProperty) keep their shape,
/// only gaining the `type` tag when missing. Any other value is wrapped as
/// `{"type": "Property", "value": ...}`.
pub fn clean(entity: &Value, exceptions: &[String]) -> Value {
    let Value::Object(obj) = entity else {
        return entity.clone();
    };

    let mut cleaned = Map::new();
    for (key, value) in obj {
        if key == "id" || key == "type" || key == "@context" {
            cleaned.insert(key.clone(), value.clone());
            continue;
        }

        if value.is_null() {
            continue;
        }

        if exceptions.iter().any(|e| e == key) {
            cleaned.insert(key.clone(), value.clone());
            continue;
        }

        cleaned.insert(key.clone(), normalize_attribute(value));
    }

    Value::Object(cleaned)
}

fn normalize_attribute(value: &Value) -> Value {
    let kind = classify(value);

    if let Value::Object(obj) = value {
        let already_shaped = match kind {
            NgsiAttributeKind::Relationship => obj.contains_key("object"),
            NgsiAttributeKind::GeoProperty | NgsiAttributeKind::Property => {
                obj.contains_key("value")
            }
        };
        if already_shaped {
            let mut shaped = obj.clone();
            shaped.insert("type".to_string(), Value::String(kind.as_str().to_string()));
            return Value::Object(shaped);
        }
    }

    let mut wrapped = Map::new();
    wrapped.insert(
        "type".to_string(),
        Value::String(NgsiAttributeKind::Property.as_str().to_string()),
    );
    wrapped.insert("value".to_string(), value.clone());
    Value::Object(wrapped)
}
