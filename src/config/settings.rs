use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_json::Value;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub entity: EntityConfig,
}

/// Where the context broker lives and how this bridge identifies itself.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Name embedded in subscription descriptions so the bridge can find
    /// its own subscriptions on the broker later.
    #[serde(default = "default_project_name")]
    pub project_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default)]
    pub entity_type: String,
    /// Optional entity id restriction; empty means type-wide.
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub watched_attributes: Vec<String>,
    /// NGSI-LD `q` filter expression, e.g. `fillingLevel>0.7`.
    #[serde(default)]
    pub q_filter: String,
    /// JSON-LD context URL sent in the Link header.
    #[serde(default = "default_context")]
    pub context: String,
    /// Explicit identifier for the subscription; generated when empty.
    #[serde(default)]
    pub subscription_identifier: String,
    #[serde(default)]
    pub delete_all_artifact_subscriptions: bool,
    #[serde(default)]
    pub delete_subscription_identifier: String,
    /// Only purge existing subscriptions, do not create a new one.
    #[serde(default)]
    pub delete_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    /// Entity skeleton with `{placeholder}` leaves filled from payloads.
    #[serde(default = "default_template")]
    pub json_template: Value,
    /// Attribute names forwarded to the broker without Property wrapping.
    #[serde(default)]
    pub json_exceptions: Vec<String>,
    /// Allow-list of attributes to patch; empty means update everything.
    #[serde(default)]
    pub columns_update: Vec<String>,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    9090
}

fn default_project_name() -> String {
    "ngsild-bridge".to_string()
}

fn default_context() -> String {
    "https://uri.etsi.org/ngsi-ld/v1/ngsi-ld-core-context.jsonld".to_string()
}

fn default_template() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("broker.host", "localhost")?
            .set_default("broker.port", 9090)?
            .set_default("broker.project_name", "ngsild-bridge")?
            .set_default(
                "subscription.context",
                "https://uri.etsi.org/ngsi-ld/v1/ngsi-ld-core-context.jsonld",
            )?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // BROKER_HOST, BROKER_PORT, SUBSCRIPTION_ENTITY_TYPE, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn broker_url(&self) -> String {
        format!("http://{}:{}", self.broker.host, self.broker.port)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            project_name: default_project_name(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            entity_type: String::new(),
            entity_id: String::new(),
            watched_attributes: vec![],
            q_filter: String::new(),
            context: default_context(),
            subscription_identifier: String::new(),
            delete_all_artifact_subscriptions: false,
            delete_subscription_identifier: String::new(),
            delete_only: false,
        }
    }
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            json_template: default_template(),
            json_exceptions: vec![],
            columns_update: vec![],
        }
    }
}
