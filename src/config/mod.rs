mod settings;

pub use settings::{BrokerConfig, EntityConfig, Settings, SubscriptionConfig};
