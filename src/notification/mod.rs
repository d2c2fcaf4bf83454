//! Broker notification documents and the last-seen entity cache

mod cache;
mod types;

pub use cache::{CacheEntry, NotificationCache};
pub use types::{filter_entity_attributes, NgsiNotification};
