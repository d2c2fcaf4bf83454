//! Entity construction: template rendering and attribute normalization

pub mod attributes;
pub mod template;

pub use attributes::{classify, clean, NgsiAttributeKind};
pub use template::render;

use crate::config::EntityConfig;
use crate::error::Result;
use serde_json::Value;

/// Render the configured template against a payload and normalize the
/// result into a broker-ready entity document.
pub fn build_entity(config: &EntityConfig, payload: &Value) -> Result<Value> {
    let rendered = render(&config.json_template, payload)?;
    Ok(clean(&rendered, &config.json_exceptions))
}

const URN_PREFIX: &str = "urn:ngsi-ld:";

/// Fully-qualified NGSI-LD entity id. Ids that already carry the urn
/// prefix pass through unchanged.
pub fn format_entity_id(entity_type: &str, id: &str) -> String {
    if id.starts_with(URN_PREFIX) {
        id.to_string()
    } else {
        format!("{URN_PREFIX}{entity_type}:{id}")
    }
}
