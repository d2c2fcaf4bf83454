use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Notification document the broker POSTs to the callback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NgsiNotification {
    /// Broker-assigned notification id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "subscriptionId")]
    pub subscription_id: String,
    #[serde(
        rename = "notifiedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub notified_at: Option<DateTime<Utc>>,
    /// Entity fragments matching the subscription
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Restrict an entity fragment to the watched attributes.
///
/// `id`, `type` and `@context` always survive. An empty watch list keeps
/// the fragment whole. `None` means the fragment carries none of the
/// watched attributes and should not be forwarded downstream.
pub fn filter_entity_attributes(entity: &Value, watched: &[String]) -> Option<Value> {
    let Value::Object(obj) = entity else {
        return None;
    };

    if watched.is_empty() {
        return Some(entity.clone());
    }

    let mut filtered = Map::new();
    let mut matched = false;
    for (key, value) in obj {
        if key == "id" || key == "type" || key == "@context" {
            filtered.insert(key.clone(), value.clone());
            continue;
        }
        if watched.iter().any(|w| w == key) {
            filtered.insert(key.clone(), value.clone());
            matched = true;
        }
    }

    matched.then_some(Value::Object(filtered))
}
