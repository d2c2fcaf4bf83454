//! Broker notification callback endpoint.

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::notification::{filter_entity_attributes, NgsiNotification};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub received: usize,
    pub forwarded: usize,
}

/// `POST /notify`, the endpoint the broker was subscribed with.
///
/// Every entity fragment is cached under its id. Fragments carrying at
/// least one watched attribute (or everything, when no watch list is
/// configured) are forwarded to the sink. A notification whose fragments
/// are all filtered out still answers 200, so the broker does not back
/// off.
#[tracing::instrument(name = "api.notify", skip(state, body))]
pub async fn notify(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<NotifyResponse>> {
    let notification: NgsiNotification =
        serde_json::from_value(body).map_err(|err| BridgeError::Payload(err.to_string()))?;

    tracing::debug!(
        subscription_id = %notification.subscription_id,
        entities = notification.data.len(),
        "notification received"
    );

    let mut forwarded = 0;
    for entity in &notification.data {
        if !state.cache.upsert(entity) {
            tracing::warn!("notification entity without id, not cached");
        }

        if let Some(filtered) = filter_entity_attributes(entity, &state.watched_attributes) {
            match state.sink.publish(filtered).await {
                Ok(()) => forwarded += 1,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to forward notification downstream");
                }
            }
        }
    }

    Ok(Json(NotifyResponse {
        received: notification.data.len(),
        forwarded,
    }))
}
