//! Create-vs-update reconciliation against the context broker

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::broker::{BrokerClient, PatchOutcome};
use crate::config::EntityConfig;
use crate::entity;
use crate::error::{BridgeError, Result};

/// What the reconciler ended up doing with an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Updated,
}

/// Per-batch outcome counts for `process_and_send_data`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Optional caller hook that turns one raw payload into one or many
/// reconcilable payloads.
pub type PayloadTransform = Box<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// Drives payloads into the broker, creating entities that do not exist
/// and patching the ones that do.
pub struct Reconciler {
    client: Arc<BrokerClient>,
    entity_config: EntityConfig,
    transform: Option<PayloadTransform>,
}

impl Reconciler {
    pub fn new(client: Arc<BrokerClient>, entity_config: EntityConfig) -> Self {
        Self {
            client,
            entity_config,
            transform: None,
        }
    }

    /// Install a payload transformation applied before rendering.
    pub fn with_transform(mut self, transform: PayloadTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Whether the broker knows the entity. Only a 404 answer counts as
    /// absent; transport failures and other rejections propagate.
    #[tracing::instrument(name = "reconciler.entity_exists", skip(self))]
    pub async fn entity_exists(&self, entity_id: &str) -> Result<bool> {
        Ok(self.client.get_entity(entity_id).await?.is_some())
    }

    /// Register a brand-new entity with the broker.
    #[tracing::instrument(
        name = "reconciler.create_new_entity",
        skip(self, entity),
        fields(entity_id = %entity_id_of(entity))
    )]
    pub async fn create_new_entity(&self, entity: &Value) -> Result<()> {
        match self.client.create_entity(entity).await {
            Ok(()) => {
                tracing::info!(entity_id = %entity_id_of(entity), "created entity");
                Ok(())
            }
            // Lost race with another writer; the entity is there, which is
            // all the caller needed.
            Err(BridgeError::Broker {
                status: Some(409),
                message,
            }) => {
                tracing::warn!(
                    entity_id = %entity_id_of(entity),
                    %message,
                    "entity already existed on broker"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Patch one attribute, appending it when the broker has never seen it.
    #[tracing::instrument(
        name = "reconciler.update_entity_attribute",
        skip(self, attribute_value)
    )]
    pub async fn update_entity_attribute(
        &self,
        entity_id: &str,
        attribute: &str,
        attribute_value: &Value,
    ) -> Result<()> {
        let outcome = self
            .client
            .patch_attribute(entity_id, attribute, attribute_value)
            .await?;

        match outcome {
            PatchOutcome::Applied => {
                tracing::debug!(entity_id, attribute, "patched attribute");
            }
            PatchOutcome::AttributeMissing => {
                let mut fragment = Map::new();
                fragment.insert(attribute.to_string(), attribute_value.clone());
                self.client
                    .append_attributes(entity_id, &Value::Object(fragment))
                    .await?;
                tracing::debug!(entity_id, attribute, "appended new attribute");
            }
        }
        Ok(())
    }

    /// Update every attribute of an entity document.
    #[tracing::instrument(
        name = "reconciler.update_all_attributes",
        skip(self, entity),
        fields(entity_id = %entity_id_of(entity))
    )]
    pub async fn update_all_attributes(&self, entity: &Value) -> Result<usize> {
        self.update_attributes(entity, None).await
    }

    /// Update only the attributes named in `columns`.
    #[tracing::instrument(
        name = "reconciler.update_specific_attributes",
        skip(self, entity),
        fields(entity_id = %entity_id_of(entity), columns = columns.len())
    )]
    pub async fn update_specific_attributes(
        &self,
        entity: &Value,
        columns: &[String],
    ) -> Result<usize> {
        self.update_attributes(entity, Some(columns)).await
    }

    async fn update_attributes(&self, entity: &Value, columns: Option<&[String]>) -> Result<usize> {
        let Value::Object(obj) = entity else {
            return Err(BridgeError::Payload(
                "entity document must be a JSON object".to_string(),
            ));
        };

        let entity_id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Payload("entity document has no id".to_string()))?;

        let mut updated = 0;
        for (name, value) in obj {
            if name == "id" || name == "type" || name == "@context" {
                continue;
            }
            if let Some(allowed) = columns {
                if !allowed.iter().any(|c| c == name) {
                    continue;
                }
            }
            self.update_entity_attribute(entity_id, name, value).await?;
            updated += 1;
        }

        tracing::debug!(entity_id, updated, "updated entity attributes");
        Ok(updated)
    }

    /// Update the entity if the broker knows it, create it otherwise.
    /// A configured `columns_update` allow-list restricts which attributes
    /// get patched; creation always sends the full document.
    #[tracing::instrument(
        name = "reconciler.update_or_create",
        skip(self, entity),
        fields(entity_id = %entity_id_of(entity))
    )]
    pub async fn update_or_create_entity(&self, entity: &Value) -> Result<ReconcileAction> {
        let entity_id = entity
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Payload("entity document has no id".to_string()))?;

        if self.entity_exists(entity_id).await? {
            if self.entity_config.columns_update.is_empty() {
                self.update_all_attributes(entity).await?;
            } else {
                let columns = self.entity_config.columns_update.clone();
                self.update_specific_attributes(entity, &columns).await?;
            }
            Ok(ReconcileAction::Updated)
        } else {
            self.create_new_entity(entity).await?;
            Ok(ReconcileAction::Created)
        }
    }

    /// Full pipeline for one agent payload: apply the optional transform,
    /// render each resulting payload through the configured template,
    /// normalize attributes, reconcile with the broker. One bad payload in
    /// a transformed batch never sinks the others.
    #[tracing::instrument(name = "reconciler.process_payload", skip(self, payload))]
    pub async fn process_and_send_data(&self, payload: &Value) -> ReconcileSummary {
        let payloads = match &self.transform {
            Some(transform) => transform(payload),
            None => vec![payload.clone()],
        };

        let mut summary = ReconcileSummary::default();
        for item in &payloads {
            match self.reconcile_one(item).await {
                Ok(ReconcileAction::Created) => summary.created += 1,
                Ok(ReconcileAction::Updated) => summary.updated += 1,
                Err(err) => {
                    tracing::error!(error = %err, "payload reconciliation failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::debug!(
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            "processed payload batch"
        );
        summary
    }

    async fn reconcile_one(&self, payload: &Value) -> Result<ReconcileAction> {
        let entity = entity::build_entity(&self.entity_config, payload)?;
        self.update_or_create_entity(&entity).await
    }
}

fn entity_id_of(entity: &Value) -> &str {
    entity
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("<missing-id>")
}
