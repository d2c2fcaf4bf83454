//! HTTP client for the NGSI-LD context broker

use std::time::Duration;

use crate::error::{BridgeError, Result};
use serde_json::Value;

const ENTITIES_PATH: &str = "/ngsi-ld/v1/entities";
const SUBSCRIPTIONS_PATH: &str = "/ngsi-ld/v1/subscriptions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a single-attribute PATCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// The broker does not know the attribute yet; it must be appended.
    AttributeMissing,
}

#[derive(Debug, Clone)]
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    context: String,
    tenant: Option<String>,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            context: context.into(),
            tenant: None,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// JSON-LD Link header pointing at the configured @context.
    fn link_header(&self) -> String {
        format!(
            "<{}>; rel=\"http://www.w3.org/ns/json-ld#context\"; type=\"application/ld+json\"",
            self.context
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .timeout(REQUEST_TIMEOUT)
            .header("Link", self.link_header());
        if let Some(tenant) = &self.tenant {
            builder = builder.header("NGSILD-Tenant", tenant.clone());
        }
        builder
    }

    /// Fetch an entity by id. `Ok(None)` means the broker answered 404;
    /// any other non-success status is surfaced as a broker error.
    pub async fn get_entity(&self, entity_id: &str) -> Result<Option<Value>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("{}/{}", ENTITIES_PATH, entity_id),
            )
            .send()
            .await?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(broker_rejection(status, response).await),
        }
    }

    /// Create a new entity. The broker answers 201 on success.
    pub async fn create_entity(&self, entity: &Value) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, ENTITIES_PATH)
            .json(entity)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(broker_rejection(status, response).await)
        }
    }

    /// Patch one attribute of an existing entity. A 404 (or a partial 207)
    /// answer means the attribute does not exist on the entity yet.
    pub async fn patch_attribute(
        &self,
        entity_id: &str,
        attribute: &str,
        fragment: &Value,
    ) -> Result<PatchOutcome> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("{}/{}/attrs/{}", ENTITIES_PATH, entity_id, attribute),
            )
            .json(fragment)
            .send()
            .await?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::MULTI_STATUS => {
                Ok(PatchOutcome::AttributeMissing)
            }
            status if status.is_success() => Ok(PatchOutcome::Applied),
            status => Err(broker_rejection(status, response).await),
        }
    }

    /// Append attributes to an existing entity.
    pub async fn append_attributes(&self, entity_id: &str, fragment: &Value) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("{}/{}/attrs", ENTITIES_PATH, entity_id),
            )
            .json(fragment)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(broker_rejection(status, response).await)
        }
    }

    /// Register a subscription and return the broker-assigned id from the
    /// Location header.
    pub async fn create_subscription(&self, subscription: &Value) -> Result<String> {
        let response = self
            .request(reqwest::Method::POST, SUBSCRIPTIONS_PATH)
            .json(subscription)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(broker_rejection(status, response).await);
        }

        let location = response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                BridgeError::broker(status.as_u16(), "subscription created without Location header")
            })?;

        // Location is a path like /ngsi-ld/v1/subscriptions/<id>
        let broker_id = location
            .rsplit('/')
            .next()
            .unwrap_or(location)
            .to_string();
        Ok(broker_id)
    }

    /// Remove a subscription by its broker-assigned id.
    pub async fn delete_subscription(&self, broker_id: &str) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("{}/{}", SUBSCRIPTIONS_PATH, broker_id),
            )
            .send()
            .await?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Err(BridgeError::NotFound(format!(
                "subscription {broker_id} not on broker"
            ))),
            status if status.is_success() => Ok(()),
            status => Err(broker_rejection(status, response).await),
        }
    }

    /// List every subscription currently registered on the broker.
    pub async fn list_subscriptions(&self) -> Result<Vec<Value>> {
        let response = self
            .request(reqwest::Method::GET, SUBSCRIPTIONS_PATH)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(broker_rejection(status, response).await);
        }

        let body: Value = response.json().await?;
        match body {
            Value::Array(items) => Ok(items),
            other => Err(BridgeError::broker(
                status.as_u16(),
                format!("expected subscription array, got: {other}"),
            )),
        }
    }
}

async fn broker_rejection(status: reqwest::StatusCode, response: reqwest::Response) -> BridgeError {
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        "broker rejected request".to_string()
    } else {
        body
    };
    BridgeError::broker(status.as_u16(), message)
}
