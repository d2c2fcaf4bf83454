use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

use crate::broker::BrokerClient;
use crate::config::SubscriptionConfig;
use crate::entity::format_entity_id;
use crate::error::{BridgeError, Result};
use crate::net::NetworkBinding;

use super::registry::{ActiveSubscription, SubscriptionRegistry, SubscriptionState};

/// Outcome of a best-effort bulk deletion on the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub deleted: usize,
    pub failed: usize,
}

/// Owns the bridge's broker subscriptions and the notify server lifetime.
pub struct SubscriptionManager {
    client: Arc<BrokerClient>,
    config: SubscriptionConfig,
    project_name: String,
    registry: SubscriptionRegistry,
    active_count: Arc<AtomicUsize>,
}

impl SubscriptionManager {
    pub fn new(
        client: Arc<BrokerClient>,
        config: SubscriptionConfig,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            config,
            project_name: project_name.into(),
            registry: SubscriptionRegistry::new(),
            active_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared gauge of active subscriptions, read by the health endpoint.
    pub fn active_count_handle(&self) -> Arc<AtomicUsize> {
        self.active_count.clone()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    fn sync_gauge(&self) {
        self.active_count.store(self.registry.len(), Ordering::Relaxed);
    }

    /// `sub_` plus eight random alphanumeric characters.
    pub fn generate_subscription_identifier() -> String {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        format!("sub_{suffix}")
    }

    fn resolve_identifier(&self) -> String {
        if self.config.subscription_identifier.is_empty() {
            Self::generate_subscription_identifier()
        } else {
            self.config.subscription_identifier.clone()
        }
    }

    /// Ownership marker embedded in every subscription description so the
    /// bridge can find its own subscriptions on the broker later.
    fn artifact_marker(&self) -> String {
        format!("Artifact-ID: {}", self.project_name)
    }

    fn identifier_marker(identifier: &str) -> String {
        format!("Sub-ID: {identifier}")
    }

    /// Assemble the NGSI-LD subscription document for this bridge.
    pub fn build_subscription_data(&self, identifier: &str, notify_uri: &str) -> Value {
        let mut entity = Map::new();
        entity.insert(
            "type".to_string(),
            Value::String(self.config.entity_type.clone()),
        );
        if !self.config.entity_id.is_empty() {
            entity.insert(
                "id".to_string(),
                Value::String(format_entity_id(
                    &self.config.entity_type,
                    &self.config.entity_id,
                )),
            );
        }

        let mut notification = Map::new();
        notification.insert(
            "endpoint".to_string(),
            json!({"uri": notify_uri, "accept": "application/json"}),
        );
        if !self.config.watched_attributes.is_empty() {
            notification.insert(
                "attributes".to_string(),
                json!(self.config.watched_attributes),
            );
        }

        let mut subscription = Map::new();
        subscription.insert("type".to_string(), Value::String("Subscription".to_string()));
        subscription.insert(
            "description".to_string(),
            Value::String(format!(
                "{}, {}",
                self.artifact_marker(),
                Self::identifier_marker(identifier)
            )),
        );
        subscription.insert("entities".to_string(), json!([entity]));
        if !self.config.watched_attributes.is_empty() {
            subscription.insert(
                "watchedAttributes".to_string(),
                json!(self.config.watched_attributes),
            );
        }
        if !self.config.q_filter.is_empty() {
            subscription.insert("q".to_string(), Value::String(self.config.q_filter.clone()));
        }
        subscription.insert("notification".to_string(), Value::Object(notification));

        Value::Object(subscription)
    }

    /// Register a subscription under `identifier`. An identifier already
    /// in use is replaced: the stale broker subscription is deleted before
    /// the new one is created, so two entries never coexist.
    #[tracing::instrument(name = "subscription.create", skip(self, notify_uri))]
    pub async fn create_subscription(
        &mut self,
        identifier: &str,
        notify_uri: &str,
    ) -> Result<ActiveSubscription> {
        if let Some(stale) = self.registry.get(identifier).cloned() {
            tracing::info!(
                identifier,
                stale_subscription = %stale.subscription_id,
                "replacing existing subscription"
            );
            self.registry.mark(identifier, SubscriptionState::PendingDelete);
            match self.client.delete_subscription(&stale.subscription_id).await {
                Ok(()) | Err(BridgeError::NotFound(_)) => {
                    self.registry.remove(identifier);
                    self.sync_gauge();
                }
                Err(err) => {
                    self.registry.mark(identifier, SubscriptionState::Active);
                    return Err(err);
                }
            }
        }

        let payload = self.build_subscription_data(identifier, notify_uri);
        let broker_id = self.client.create_subscription(&payload).await?;

        let subscription = ActiveSubscription {
            subscription_id: broker_id.clone(),
            subscription_identifier: identifier.to_string(),
            entity_type: self.config.entity_type.clone(),
            entity_id: (!self.config.entity_id.is_empty()).then(|| {
                format_entity_id(&self.config.entity_type, &self.config.entity_id)
            }),
            watched_attributes: self.config.watched_attributes.clone(),
            q_filter: (!self.config.q_filter.is_empty()).then(|| self.config.q_filter.clone()),
            state: SubscriptionState::Active,
            created_at: chrono::Utc::now(),
        };
        self.registry.insert(subscription.clone());
        self.sync_gauge();

        tracing::info!(identifier, subscription_id = %broker_id, "subscription created");
        Ok(subscription)
    }

    /// Delete by broker-assigned subscription id.
    #[tracing::instrument(name = "subscription.delete", skip(self))]
    pub async fn delete_subscription(&mut self, subscription_id: &str) -> Result<()> {
        self.client.delete_subscription(subscription_id).await?;

        let owner = self
            .registry
            .iter()
            .find(|s| s.subscription_id == subscription_id)
            .map(|s| s.subscription_identifier.clone());
        if let Some(identifier) = owner {
            self.registry.remove(&identifier);
            self.sync_gauge();
        }

        tracing::info!(subscription_id, "subscription deleted");
        Ok(())
    }

    /// Delete by caller identifier. Unknown identifiers are an error; a
    /// broker that already forgot the subscription is not.
    #[tracing::instrument(name = "subscription.delete_by_identifier", skip(self))]
    pub async fn delete_subscription_by_identifier(&mut self, identifier: &str) -> Result<()> {
        let subscription_id = self
            .registry
            .get(identifier)
            .map(|s| s.subscription_id.clone())
            .ok_or_else(|| {
                BridgeError::NotFound(format!("no subscription with identifier {identifier}"))
            })?;

        self.registry.mark(identifier, SubscriptionState::PendingDelete);
        match self.client.delete_subscription(&subscription_id).await {
            Ok(()) | Err(BridgeError::NotFound(_)) => {
                self.registry.remove(identifier);
                self.sync_gauge();
                tracing::info!(identifier, subscription_id = %subscription_id, "subscription deleted");
                Ok(())
            }
            Err(err) => {
                self.registry.mark(identifier, SubscriptionState::Active);
                Err(err)
            }
        }
    }

    /// Delete every broker subscription carrying this bridge's artifact
    /// marker. Deletions are independent; one failure does not stop the
    /// rest.
    #[tracing::instrument(name = "subscription.purge_artifact", skip(self))]
    pub async fn delete_artifact_subscriptions(&mut self) -> Result<PurgeOutcome> {
        let marker = self.artifact_marker();
        self.purge_matching(&marker).await
    }

    /// Delete broker subscriptions whose description carries the given
    /// identifier marker. Used at startup, before the registry has entries.
    #[tracing::instrument(name = "subscription.purge_identifier", skip(self))]
    pub async fn purge_identifier(&mut self, identifier: &str) -> Result<PurgeOutcome> {
        let marker = Self::identifier_marker(identifier);
        let outcome = self.purge_matching(&marker).await?;
        self.registry.remove(identifier);
        self.sync_gauge();
        Ok(outcome)
    }

    async fn purge_matching(&mut self, marker: &str) -> Result<PurgeOutcome> {
        let subscriptions = self.client.list_subscriptions().await?;

        let mut outcome = PurgeOutcome::default();
        let mut removed_ids = Vec::new();
        for subscription in &subscriptions {
            let description = subscription
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !description.contains(marker) {
                continue;
            }
            let Some(subscription_id) = subscription.get("id").and_then(Value::as_str) else {
                continue;
            };

            match self.client.delete_subscription(subscription_id).await {
                Ok(()) | Err(BridgeError::NotFound(_)) => {
                    outcome.deleted += 1;
                    removed_ids.push(subscription_id.to_string());
                }
                Err(err) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        subscription_id,
                        error = %err,
                        "failed to delete broker subscription"
                    );
                }
            }
        }

        let orphaned: Vec<String> = self
            .registry
            .iter()
            .filter(|s| removed_ids.contains(&s.subscription_id))
            .map(|s| s.subscription_identifier.clone())
            .collect();
        for identifier in orphaned {
            self.registry.remove(&identifier);
        }
        self.sync_gauge();

        tracing::info!(
            marker,
            deleted = outcome.deleted,
            failed = outcome.failed,
            "purged broker subscriptions"
        );
        Ok(outcome)
    }

    /// Startup orchestration: optional bulk purge, optional targeted purge,
    /// then either stop (delete-only mode) or create the configured
    /// subscription. Steps run strictly in this order.
    #[tracing::instrument(name = "subscription.startup", skip(self, notify_uri))]
    pub async fn startup(&mut self, notify_uri: &str) -> Result<Option<ActiveSubscription>> {
        if self.config.delete_all_artifact_subscriptions {
            self.delete_artifact_subscriptions().await?;
        }

        if !self.config.delete_subscription_identifier.is_empty() {
            let identifier = self.config.delete_subscription_identifier.clone();
            self.purge_identifier(&identifier).await?;
        }

        if self.config.delete_only {
            tracing::info!("delete-only mode, no subscription created");
            return Ok(None);
        }

        let identifier = self.resolve_identifier();
        let subscription = self.create_subscription(&identifier, notify_uri).await?;
        Ok(Some(subscription))
    }

    /// Run the subscriber path: perform startup orchestration, then serve
    /// the notify endpoint until shutdown. The bridge's own subscriptions
    /// are removed from the broker on the way out, best-effort.
    pub async fn run(
        mut self,
        binding: NetworkBinding,
        app: axum::Router,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let notify_uri = format!("http://{}:{}/notify", binding.local_ip, binding.port);

        if self.startup(&notify_uri).await?.is_none() {
            return Ok(());
        }

        let listener =
            tokio::net::TcpListener::bind(("0.0.0.0", binding.port)).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            notify_uri = %notify_uri,
            "notify endpoint listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("notify server received shutdown signal");
            })
            .await?;

        for identifier in self.registry.identifiers() {
            if let Err(err) = self.delete_subscription_by_identifier(&identifier).await {
                tracing::warn!(
                    identifier = %identifier,
                    error = %err,
                    "failed to remove subscription during shutdown"
                );
            }
        }

        tracing::info!("subscription manager stopped");
        Ok(())
    }
}
