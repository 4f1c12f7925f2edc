//! Directory service resources.

use devlink_core::Config;
use devlink_proto::{messages::pairs_to_config, KeyValuePair};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pubsub coordinates of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSubEndpoint {
    /// Transport protocol, typically "MQTT"
    #[serde(default)]
    pub protocol: String,
    /// Base topic of the node
    #[serde(default, rename = "endpoint")]
    pub topic: String,
}

/// A service as described by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    /// Service identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Pubsub endpoint
    #[serde(default)]
    pub pubsub: PubSubEndpoint,
    /// Service-wide properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ServiceNode {
    /// Look up a service property, returning `""` when absent.
    #[must_use]
    pub fn property(&self, key: &str) -> &str {
        self.properties.get(key).map_or("", String::as_str)
    }
}

/// A service linked to a device, with the device's config for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedService {
    /// Service identifier
    pub service_id: String,
    /// Config for that service
    #[serde(default)]
    pub config: Vec<KeyValuePair>,
}

/// A device as described by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNode {
    /// Device identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Pubsub endpoint
    #[serde(default)]
    pub pubsub: PubSubEndpoint,
    /// Device properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Services linked to this device
    #[serde(default, rename = "linked_services")]
    pub services: Vec<LinkedService>,
}

/// A device currently linked to a service, from the service's device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedDevice {
    /// Device identifier
    pub id: String,
    /// Device's config for the service
    #[serde(default)]
    pub config: Vec<KeyValuePair>,
}

impl LinkedDevice {
    /// The config as a map.
    #[must_use]
    pub fn config_map(&self) -> Config {
        pairs_to_config(&self.config)
    }
}

/// Reported health of the directory service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Server reports ok
    Ok,
    /// Server reports degraded operation
    Degraded,
    /// Not reported, or a value this client does not know
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Interpret the server's status string.
    #[must_use]
    pub fn from_reported(status: &str) -> Self {
        match status {
            "ok" => Self::Ok,
            "degraded" => Self::Degraded,
            _ => Self::Unknown,
        }
    }
}
