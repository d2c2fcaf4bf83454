//! Cross-component integration tests
//!
//! These tests drive the reconciler and subscription manager against an
//! in-process mock context broker, and the notify endpoint through
//! tower's oneshot, without requiring a real NGSI-LD deployment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceExt;

use ngsild_bridge_service::broker::BrokerClient;
use ngsild_bridge_service::config::{EntityConfig, SubscriptionConfig};
use ngsild_bridge_service::ingress::notification_channel;
use ngsild_bridge_service::reconciler::Reconciler;
use ngsild_bridge_service::server::{create_app, AppState};
use ngsild_bridge_service::subscription::SubscriptionManager;

// =============================================================================
// Mock context broker
// =============================================================================

#[derive(Default)]
struct BrokerState {
    entities: Mutex<HashMap<String, Value>>,
    created: Mutex<Vec<Value>>,
    patched: Mutex<Vec<(String, String, Value)>>,
    appended: Mutex<Vec<(String, Value)>>,
    subscriptions: Mutex<HashMap<String, Value>>,
    subscription_counter: AtomicUsize,
}

struct MockBroker {
    base_url: String,
    state: Arc<BrokerState>,
}

impl MockBroker {
    fn seed_entity(&self, entity: Value) {
        let id = entity["id"].as_str().unwrap().to_string();
        self.state.entities.lock().unwrap().insert(id, entity);
    }

    fn seed_subscription(&self, id: &str, document: Value) {
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .insert(id.to_string(), document);
    }

    fn subscription_count(&self) -> usize {
        self.state.subscriptions.lock().unwrap().len()
    }
}

async fn start_mock_broker() -> MockBroker {
    let state = Arc::new(BrokerState::default());

    let app = Router::new()
        .route("/ngsi-ld/v1/entities/{id}", get(get_entity))
        .route("/ngsi-ld/v1/entities", post(create_entity))
        .route(
            "/ngsi-ld/v1/entities/{id}/attrs/{attr}",
            axum::routing::patch(patch_attribute),
        )
        .route("/ngsi-ld/v1/entities/{id}/attrs", post(append_attributes))
        .route("/ngsi-ld/v1/subscriptions", post(create_subscription))
        .route("/ngsi-ld/v1/subscriptions", get(list_subscriptions))
        .route(
            "/ngsi-ld/v1/subscriptions/{id}",
            delete(delete_subscription),
        )
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBroker { base_url, state }
}

async fn get_entity(
    State(state): State<Arc<BrokerState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state
        .entities
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn create_entity(
    State(state): State<Arc<BrokerState>>,
    Json(entity): Json<Value>,
) -> StatusCode {
    let Some(id) = entity["id"].as_str().map(str::to_string) else {
        return StatusCode::BAD_REQUEST;
    };
    if state.entities.lock().unwrap().contains_key(&id) {
        return StatusCode::CONFLICT;
    }
    state.created.lock().unwrap().push(entity.clone());
    state.entities.lock().unwrap().insert(id, entity);
    StatusCode::CREATED
}

async fn patch_attribute(
    State(state): State<Arc<BrokerState>>,
    Path((id, attr)): Path<(String, String)>,
    Json(fragment): Json<Value>,
) -> StatusCode {
    let mut entities = state.entities.lock().unwrap();
    let Some(entity) = entities.get_mut(&id) else {
        return StatusCode::NOT_FOUND;
    };
    if entity.get(&attr).is_none() {
        return StatusCode::NOT_FOUND;
    }
    entity[&attr] = fragment.clone();
    state.patched.lock().unwrap().push((id, attr, fragment));
    StatusCode::NO_CONTENT
}

async fn append_attributes(
    State(state): State<Arc<BrokerState>>,
    Path(id): Path<String>,
    Json(fragment): Json<Value>,
) -> StatusCode {
    let mut entities = state.entities.lock().unwrap();
    let Some(entity) = entities.get_mut(&id) else {
        return StatusCode::NOT_FOUND;
    };
    if let (Some(target), Some(source)) = (entity.as_object_mut(), fragment.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    state.appended.lock().unwrap().push((id, fragment));
    StatusCode::NO_CONTENT
}

async fn create_subscription(
    State(state): State<Arc<BrokerState>>,
    Json(document): Json<Value>,
) -> (StatusCode, [(header::HeaderName, String); 1]) {
    let n = state.subscription_counter.fetch_add(1, Ordering::SeqCst);
    let id = format!("urn:ngsi-ld:Subscription:{n}");
    state
        .subscriptions
        .lock()
        .unwrap()
        .insert(id.clone(), document);
    (
        StatusCode::CREATED,
        [(header::LOCATION, format!("/ngsi-ld/v1/subscriptions/{id}"))],
    )
}

async fn list_subscriptions(State(state): State<Arc<BrokerState>>) -> Json<Value> {
    let subscriptions = state.subscriptions.lock().unwrap();
    let items: Vec<Value> = subscriptions
        .iter()
        .map(|(id, doc)| {
            let mut doc = doc.clone();
            doc["id"] = json!(id);
            doc
        })
        .collect();
    Json(Value::Array(items))
}

async fn delete_subscription(
    State(state): State<Arc<BrokerState>>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.subscriptions.lock().unwrap().remove(&id).is_some() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

// =============================================================================
// Test environment
// =============================================================================

fn waste_container_config() -> EntityConfig {
    EntityConfig {
        json_template: json!({
            "id": "urn:ngsi-ld:WasteContainer:wc-005",
            "type": "WasteContainer",
            "fillingLevel": "{level}",
            "temperature": "{temperature}"
        }),
        json_exceptions: vec![],
        columns_update: vec![],
    }
}

fn broker_client(broker: &MockBroker) -> Arc<BrokerClient> {
    Arc::new(BrokerClient::new(
        broker.base_url.clone(),
        "https://uri.etsi.org/ngsi-ld/v1/ngsi-ld-core-context.jsonld",
    ))
}

fn subscription_manager(broker: &MockBroker, config: SubscriptionConfig) -> SubscriptionManager {
    SubscriptionManager::new(broker_client(broker), config, "waste-demo")
}

// =============================================================================
// Reconciler integration tests
// =============================================================================

mod reconciler_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_entity_is_created() {
        let broker = start_mock_broker().await;
        let reconciler = Reconciler::new(broker_client(&broker), waste_container_config());

        let summary = reconciler
            .process_and_send_data(&json!({"level": 0.42, "temperature": 17.0}))
            .await;

        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 0);

        let created = broker.state.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0]["id"], "urn:ngsi-ld:WasteContainer:wc-005");
        assert_eq!(
            created[0]["fillingLevel"],
            json!({"type": "Property", "value": 0.42})
        );
    }

    #[tokio::test]
    async fn test_existing_entity_is_patched() {
        let broker = start_mock_broker().await;
        broker.seed_entity(json!({
            "id": "urn:ngsi-ld:WasteContainer:wc-005",
            "type": "WasteContainer",
            "fillingLevel": {"type": "Property", "value": 0.1},
            "temperature": {"type": "Property", "value": 10.0}
        }));
        let reconciler = Reconciler::new(broker_client(&broker), waste_container_config());

        let summary = reconciler
            .process_and_send_data(&json!({"level": 0.8, "temperature": 21.0}))
            .await;

        assert_eq!(summary.updated, 1);
        assert!(broker.state.created.lock().unwrap().is_empty());

        let patched = broker.state.patched.lock().unwrap();
        assert_eq!(patched.len(), 2);
        assert!(patched
            .iter()
            .any(|(_, attr, body)| attr == "fillingLevel" && body["value"] == json!(0.8)));
    }

    #[tokio::test]
    async fn test_unknown_attribute_falls_back_to_append() {
        let broker = start_mock_broker().await;
        // Entity exists but has never reported a temperature.
        broker.seed_entity(json!({
            "id": "urn:ngsi-ld:WasteContainer:wc-005",
            "type": "WasteContainer",
            "fillingLevel": {"type": "Property", "value": 0.1}
        }));
        let reconciler = Reconciler::new(broker_client(&broker), waste_container_config());

        let summary = reconciler
            .process_and_send_data(&json!({"level": 0.5, "temperature": 19.0}))
            .await;

        assert_eq!(summary.updated, 1);

        let appended = broker.state.appended.lock().unwrap();
        assert_eq!(appended.len(), 1);
        assert!(appended[0].1.get("temperature").is_some());
    }

    #[tokio::test]
    async fn test_columns_update_restricts_patched_attributes() {
        let broker = start_mock_broker().await;
        broker.seed_entity(json!({
            "id": "urn:ngsi-ld:WasteContainer:wc-005",
            "type": "WasteContainer",
            "fillingLevel": {"type": "Property", "value": 0.1},
            "temperature": {"type": "Property", "value": 10.0}
        }));

        let config = EntityConfig {
            columns_update: vec!["fillingLevel".to_string()],
            ..waste_container_config()
        };
        let reconciler = Reconciler::new(broker_client(&broker), config);

        let summary = reconciler
            .process_and_send_data(&json!({"level": 0.9, "temperature": 25.0}))
            .await;

        assert_eq!(summary.updated, 1);

        let patched = broker.state.patched.lock().unwrap();
        assert_eq!(patched.len(), 1);
        assert_eq!(patched[0].1, "fillingLevel");
    }

    #[tokio::test]
    async fn test_transform_isolates_bad_payloads() {
        let broker = start_mock_broker().await;
        let reconciler = Reconciler::new(broker_client(&broker), waste_container_config())
            .with_transform(Box::new(|payload| {
                vec![payload.clone(), json!("not an object")]
            }));

        let summary = reconciler.process_and_send_data(&json!({"level": 0.3})).await;

        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 1);
    }
}

// =============================================================================
// Subscription lifecycle integration tests
// =============================================================================

mod subscription_tests {
    use super::*;

    fn waste_subscription_config() -> SubscriptionConfig {
        SubscriptionConfig {
            entity_type: "WasteContainer".to_string(),
            watched_attributes: vec!["fillingLevel".to_string()],
            q_filter: "fillingLevel>0.7".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_delete_lifecycle() {
        let broker = start_mock_broker().await;
        let mut manager = subscription_manager(&broker, waste_subscription_config());

        let subscription = manager
            .create_subscription("sub_test0001", "http://10.0.0.5:8123/notify")
            .await
            .unwrap();

        assert_eq!(broker.subscription_count(), 1);
        assert_eq!(subscription.subscription_identifier, "sub_test0001");
        assert_eq!(manager.registry().len(), 1);

        let stored = broker.state.subscriptions.lock().unwrap();
        let document = stored.values().next().unwrap().clone();
        drop(stored);
        assert_eq!(
            document["description"],
            "Artifact-ID: waste-demo, Sub-ID: sub_test0001"
        );
        assert_eq!(document["q"], "fillingLevel>0.7");

        manager
            .delete_subscription_by_identifier("sub_test0001")
            .await
            .unwrap();
        assert_eq!(broker.subscription_count(), 0);
        assert_eq!(manager.registry().len(), 0);

        // Second delete of the same identifier is an error
        let err = manager
            .delete_subscription_by_identifier("sub_test0001")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sub_test0001"));
    }

    #[tokio::test]
    async fn test_duplicate_identifier_replaces_subscription() {
        let broker = start_mock_broker().await;
        let mut manager = subscription_manager(&broker, waste_subscription_config());

        let first = manager
            .create_subscription("sub_dup", "http://10.0.0.5:8123/notify")
            .await
            .unwrap();
        let second = manager
            .create_subscription("sub_dup", "http://10.0.0.5:8123/notify")
            .await
            .unwrap();

        assert_ne!(first.subscription_id, second.subscription_id);
        assert_eq!(broker.subscription_count(), 1);
        assert_eq!(manager.registry().len(), 1);
        assert_eq!(
            manager.registry().get("sub_dup").unwrap().subscription_id,
            second.subscription_id
        );
    }

    #[tokio::test]
    async fn test_artifact_purge_spares_foreign_subscriptions() {
        let broker = start_mock_broker().await;
        broker.seed_subscription(
            "urn:ngsi-ld:Subscription:foreign",
            json!({
                "type": "Subscription",
                "description": "Artifact-ID: someone-else, Sub-ID: sub_other"
            }),
        );

        let mut manager = subscription_manager(&broker, waste_subscription_config());
        manager
            .create_subscription("sub_a", "http://10.0.0.5:8123/notify")
            .await
            .unwrap();
        manager
            .create_subscription("sub_b", "http://10.0.0.5:8123/notify")
            .await
            .unwrap();

        let outcome = manager.delete_artifact_subscriptions().await.unwrap();

        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(broker.subscription_count(), 1);
        assert_eq!(manager.registry().len(), 0);
    }

    #[tokio::test]
    async fn test_artifact_purge_with_nothing_tracked_is_noop() {
        let broker = start_mock_broker().await;
        let mut manager = subscription_manager(&broker, waste_subscription_config());

        let outcome = manager.delete_artifact_subscriptions().await.unwrap();

        assert_eq!(outcome.deleted, 0);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn test_startup_delete_only_purges_and_creates_nothing() {
        let broker = start_mock_broker().await;
        broker.seed_subscription(
            "urn:ngsi-ld:Subscription:stale",
            json!({
                "type": "Subscription",
                "description": "Artifact-ID: waste-demo, Sub-ID: sub_stale"
            }),
        );

        let config = SubscriptionConfig {
            delete_all_artifact_subscriptions: true,
            delete_only: true,
            ..waste_subscription_config()
        };
        let mut manager = subscription_manager(&broker, config);

        let created = manager.startup("http://10.0.0.5:8123/notify").await.unwrap();

        assert!(created.is_none());
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_startup_targeted_delete_then_create() {
        let broker = start_mock_broker().await;
        broker.seed_subscription(
            "urn:ngsi-ld:Subscription:stale",
            json!({
                "type": "Subscription",
                "description": "Artifact-ID: waste-demo, Sub-ID: sub_old01"
            }),
        );

        let config = SubscriptionConfig {
            delete_subscription_identifier: "sub_old01".to_string(),
            subscription_identifier: "sub_new01".to_string(),
            ..waste_subscription_config()
        };
        let mut manager = subscription_manager(&broker, config);

        let created = manager
            .startup("http://10.0.0.5:8123/notify")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(created.subscription_identifier, "sub_new01");
        assert_eq!(broker.subscription_count(), 1);
        let stored = broker.state.subscriptions.lock().unwrap();
        let document = stored.values().next().unwrap();
        assert!(document["description"]
            .as_str()
            .unwrap()
            .contains("sub_new01"));
    }
}

// =============================================================================
// Notify endpoint tests
// =============================================================================

mod notify_endpoint_tests {
    use super::*;
    use tokio::sync::mpsc;

    fn notify_app(
        watched: Vec<String>,
    ) -> (Router, AppState, mpsc::Receiver<Value>) {
        let (sink, downstream) = notification_channel(8);
        let state = AppState::new(watched, Arc::new(sink), Arc::new(AtomicUsize::new(0)));
        (create_app(state.clone()), state, downstream)
    }

    fn post_notify(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/notify")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_watched_attribute_filtering_and_forwarding() {
        let (app, state, mut downstream) = notify_app(vec!["fillingLevel".to_string()]);

        let notification = json!({
            "id": "urn:ngsi-ld:Notification:1",
            "type": "Notification",
            "subscriptionId": "urn:ngsi-ld:Subscription:42",
            "data": [
                {
                    "id": "urn:ngsi-ld:WasteContainer:full",
                    "type": "WasteContainer",
                    "fillingLevel": {"type": "Property", "value": 0.9},
                    "temperature": {"type": "Property", "value": 17.0}
                },
                {
                    "id": "urn:ngsi-ld:WasteContainer:quiet",
                    "type": "WasteContainer",
                    "temperature": {"type": "Property", "value": 12.0}
                }
            ]
        });

        let response = app.oneshot(post_notify(notification.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Both entities cached, watched or not
        assert_eq!(state.cache.len(), 2);
        assert!(state.cache.get("urn:ngsi-ld:WasteContainer:quiet").is_some());

        // Only the entity carrying the watched attribute is forwarded,
        // with unwatched attributes stripped
        let forwarded = downstream.recv().await.unwrap();
        assert_eq!(forwarded["id"], "urn:ngsi-ld:WasteContainer:full");
        assert!(forwarded.get("fillingLevel").is_some());
        assert!(forwarded.get("temperature").is_none());
        assert!(downstream.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected_without_state_change() {
        let (app, state, mut downstream) = notify_app(vec![]);

        let response = app
            .oneshot(post_notify("{this is not json".to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.cache.is_empty());
        assert!(downstream.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wrong_shape_json_is_rejected() {
        let (app, state, _downstream) = notify_app(vec![]);

        // Valid JSON, but not a notification document
        let response = app
            .oneshot(post_notify(json!({"hello": "world"}).to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_cache_and_subscription_gauges() {
        let (sink, _downstream) = notification_channel(8);
        let gauge = Arc::new(AtomicUsize::new(3));
        let state = AppState::new(vec![], Arc::new(sink), gauge);
        state
            .cache
            .upsert(&json!({"id": "urn:ngsi-ld:WasteContainer:one"}));
        let app = create_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["cached_entities"], 1);
        assert_eq!(body["active_subscriptions"], 3);
    }
}
