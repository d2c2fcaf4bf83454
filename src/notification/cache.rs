use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

/// Last payload seen for one entity.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub entity_id: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Entity-keyed cache of the most recent notification fragments.
///
/// Later notifications for the same entity overwrite earlier ones. The
/// cache lives in the application state and dies with it; nothing is
/// persisted.
#[derive(Debug, Default)]
pub struct NotificationCache {
    entries: DashMap<String, CacheEntry>,
}

impl NotificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the fragment under its entity id. Fragments without a string
    /// `id` are ignored and reported back to the caller.
    pub fn upsert(&self, entity: &Value) -> bool {
        let Some(entity_id) = entity.get("id").and_then(Value::as_str) else {
            return false;
        };

        self.entries.insert(
            entity_id.to_string(),
            CacheEntry {
                entity_id: entity_id.to_string(),
                payload: entity.clone(),
                received_at: Utc::now(),
            },
        );
        true
    }

    pub fn get(&self, entity_id: &str) -> Option<CacheEntry> {
        self.entries.get(entity_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_overwrites_same_entity() {
        let cache = NotificationCache::new();
        let first = json!({"id": "urn:ngsi-ld:WasteContainer:005", "fillingLevel": {"value": 0.2}});
        let second = json!({"id": "urn:ngsi-ld:WasteContainer:005", "fillingLevel": {"value": 0.9}});

        assert!(cache.upsert(&first));
        assert!(cache.upsert(&second));

        assert_eq!(cache.len(), 1);
        let entry = cache.get("urn:ngsi-ld:WasteContainer:005").unwrap();
        assert_eq!(entry.payload["fillingLevel"]["value"], json!(0.9));
    }

    #[test]
    fn test_upsert_rejects_missing_id() {
        let cache = NotificationCache::new();
        assert!(!cache.upsert(&json!({"type": "WasteContainer"})));
        assert!(cache.is_empty());
    }
}
