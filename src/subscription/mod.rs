//! Broker subscription lifecycle: registry and manager

mod manager;
mod registry;

pub use manager::{PurgeOutcome, SubscriptionManager};
pub use registry::{ActiveSubscription, SubscriptionRegistry, SubscriptionState};
