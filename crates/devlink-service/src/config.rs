//! Service configuration.

use anyhow::{Context, Result};
use devlink_core::cache::DEFAULT_CAPACITY;
use devlink_directory::{DirectoryClientConfig, ServiceNode};
use devlink_mqtt::{parse_qos, LastWillConfig, MqttConfig};
use devlink_proto::topics::DEFAULT_ROOT;
use devlink_proto::{ServiceStatus, TopicScheme};

/// Service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Service identifier, also the directory and broker user
    pub service_id: String,

    /// Service token, used as password
    pub service_token: String,

    /// Directory client configuration
    pub directory: DirectoryClientConfig,

    /// MQTT transport configuration
    pub mqtt: MqttConfig,

    /// Runtime tuning
    pub runtime: RuntimeConfig,
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Topic root (default: "openchirp")
    pub topic_root: String,

    /// Capacity of the engine's inbound queue
    pub queue_capacity: usize,

    /// Number of device controls kept cached
    pub cache_capacity: usize,

    /// Service status the broker publishes if the connection drops
    pub disconnect_status: Option<String>,

    /// Service status published when the service stops
    pub shutdown_status: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            topic_root: DEFAULT_ROOT.to_string(),
            queue_capacity: 100,
            cache_capacity: DEFAULT_CAPACITY,
            disconnect_status: None,
            shutdown_status: None,
        }
    }
}

impl ServiceConfig {
    /// Configuration for `service_id` with default endpoints.
    #[must_use]
    pub fn new(service_id: impl Into<String>, service_token: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            service_token: service_token.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DEVLINK_SERVICE_ID`: Service identifier (required)
    /// - `DEVLINK_SERVICE_TOKEN`: Service token
    /// - `DEVLINK_FRAMEWORK_URL`: Directory server URL
    /// - `DEVLINK_MQTT_BROKER`: MQTT broker URL
    /// - `DEVLINK_MQTT_QOS`: QoS, `0`-`2` or its name
    /// - `DEVLINK_TOPIC_ROOT`: Topic root
    /// - `DEVLINK_QUEUE_CAPACITY`: Engine queue capacity
    /// - `DEVLINK_CACHE_CAPACITY`: Device control cache capacity
    /// - `DEVLINK_DISCONNECT_STATUS`: Service status published on unexpected disconnect
    /// - `DEVLINK_SHUTDOWN_STATUS`: Service status published when stopping
    ///
    /// # Errors
    ///
    /// Returns error if the service id is missing or a value is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let service_id = lookup("DEVLINK_SERVICE_ID").context("DEVLINK_SERVICE_ID is not set")?;
        let service_token = lookup("DEVLINK_SERVICE_TOKEN").unwrap_or_default();
        let mut config = Self::new(service_id, service_token);

        if let Some(url) = lookup("DEVLINK_FRAMEWORK_URL") {
            config.directory.base_url = url;
        }

        if let Some(broker) = lookup("DEVLINK_MQTT_BROKER") {
            config.mqtt.broker_url = broker;
        }

        if let Some(qos) = lookup("DEVLINK_MQTT_QOS") {
            config.mqtt.qos =
                parse_qos(&qos).with_context(|| format!("Invalid DEVLINK_MQTT_QOS: {qos}"))?;
        }

        if let Some(root) = lookup("DEVLINK_TOPIC_ROOT") {
            config.runtime.topic_root = root;
        }

        if let Some(capacity) = lookup("DEVLINK_QUEUE_CAPACITY") {
            config.runtime.queue_capacity = capacity
                .parse()
                .context("Invalid DEVLINK_QUEUE_CAPACITY")?;
        }

        if let Some(capacity) = lookup("DEVLINK_CACHE_CAPACITY") {
            config.runtime.cache_capacity = capacity
                .parse()
                .context("Invalid DEVLINK_CACHE_CAPACITY")?;
        }

        config.runtime.disconnect_status = lookup("DEVLINK_DISCONNECT_STATUS");
        config.runtime.shutdown_status = lookup("DEVLINK_SHUTDOWN_STATUS");

        Ok(config)
    }

    /// Directory client configuration authenticated as this service.
    #[must_use]
    pub fn directory_config(&self) -> DirectoryClientConfig {
        DirectoryClientConfig {
            username: Some(self.service_id.clone()),
            password: Some(self.service_token.clone()),
            ..self.directory.clone()
        }
    }

    /// Topics of `service`: its directory endpoint when it has one,
    /// `{root}/service/{id}` otherwise.
    #[must_use]
    pub fn topic_scheme(&self, service: &ServiceNode) -> TopicScheme {
        let root = self.runtime.topic_root.as_str();
        if service.pubsub.topic.is_empty() {
            TopicScheme::for_service(root, &self.service_id)
        } else {
            TopicScheme::new(root, service.pubsub.topic.as_str())
        }
    }

    /// MQTT configuration authenticated as this service, with the
    /// disconnect status installed as last will on `scheme`'s status topic.
    ///
    /// # Errors
    ///
    /// Returns error if the last will payload cannot be encoded.
    pub fn mqtt_config(&self, scheme: &TopicScheme) -> Result<MqttConfig> {
        let mut mqtt = MqttConfig {
            username: Some(self.service_id.clone()),
            password: Some(self.service_token.clone()),
            ..self.mqtt.clone()
        };

        if let Some(status) = &self.runtime.disconnect_status {
            let payload = ServiceStatus::new(status.as_str())
                .to_json()
                .context("Failed to encode disconnect status")?;
            mqtt.last_will = Some(LastWillConfig {
                topic: scheme.status(),
                payload,
            });
        }

        Ok(mqtt)
    }
}
