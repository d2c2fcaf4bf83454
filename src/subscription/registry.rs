use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Lifecycle of a managed subscription. Transitions happen only inside
/// manager operations; callers observe Absent or Active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Absent,
    PendingCreate,
    Active,
    PendingDelete,
}

/// One broker subscription owned by this bridge.
#[derive(Debug, Clone)]
pub struct ActiveSubscription {
    /// Broker-assigned id (Location header of the create answer)
    pub subscription_id: String,
    /// Caller-assigned identifier, unique within this bridge
    pub subscription_identifier: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub watched_attributes: Vec<String>,
    pub q_filter: Option<String>,
    pub state: SubscriptionState,
    pub created_at: DateTime<Utc>,
}

impl ActiveSubscription {
    pub fn new(
        subscription_id: impl Into<String>,
        subscription_identifier: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            subscription_identifier: subscription_identifier.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            watched_attributes: vec![],
            q_filter: None,
            state: SubscriptionState::Active,
            created_at: Utc::now(),
        }
    }
}

/// Identifier-keyed registry of this bridge's broker subscriptions.
///
/// Owned exclusively by the subscription task, so a plain map suffices.
/// At most one entry per identifier ever exists.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, ActiveSubscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription, returning the entry it replaced.
    pub fn insert(&mut self, subscription: ActiveSubscription) -> Option<ActiveSubscription> {
        self.entries
            .insert(subscription.subscription_identifier.clone(), subscription)
    }

    pub fn get(&self, identifier: &str) -> Option<&ActiveSubscription> {
        self.entries.get(identifier)
    }

    pub fn remove(&mut self, identifier: &str) -> Option<ActiveSubscription> {
        self.entries.remove(identifier)
    }

    pub fn state(&self, identifier: &str) -> SubscriptionState {
        self.entries
            .get(identifier)
            .map(|s| s.state)
            .unwrap_or(SubscriptionState::Absent)
    }

    pub fn mark(&mut self, identifier: &str, state: SubscriptionState) -> bool {
        match self.entries.get_mut(identifier) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveSubscription> {
        self.entries.values()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
