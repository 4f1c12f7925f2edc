//! JSON envelopes carried on the service topics.

use devlink_core::{config_from_pairs, Config, DeviceUpdate};
use serde::{Deserialize, Serialize};

/// The framework's wire representation of a single config entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    /// Config key
    pub key: String,
    /// Config value
    pub value: String,
}

impl KeyValuePair {
    /// Create a pair.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Collapse a key/value list into a [`Config`].
#[must_use]
pub fn pairs_to_config(pairs: &[KeyValuePair]) -> Config {
    config_from_pairs(pairs.iter().map(|kv| (kv.key.as_str(), kv.value.as_str())))
}

/// Lifecycle action tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Device linked the service
    New,
    /// Device changed its service config
    Update,
    /// Device unlinked the service
    Delete,
}

/// The device part of a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingConfig {
    /// Device identifier
    pub id: String,
    /// Device's config for this service
    #[serde(default)]
    pub config: Vec<KeyValuePair>,
}

/// A lifecycle event as published on `{service}/thing/events`.
///
/// ```json
/// {"action":"new","thing":{"type":"device","id":"5930aaf2","config":[{"key":"rxconfig","value":"[]"}]}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// What happened
    pub action: Action,
    /// Which device, with its current config
    pub thing: ThingConfig,
}

impl LifecycleEvent {
    /// Parse an event from a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not a valid event.
    pub fn from_json(payload: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(payload).map_err(|e| MessageError::Deserialize(e.to_string()))
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }

    /// Convert to a normalized update.
    #[must_use]
    pub fn into_update(self) -> DeviceUpdate {
        let config = pairs_to_config(&self.thing.config);
        match self.action {
            Action::New => DeviceUpdate::add(self.thing.id, config),
            Action::Update => DeviceUpdate::update(self.thing.id, config),
            Action::Delete => DeviceUpdate::remove(self.thing.id),
        }
    }
}

/// Decode a live lifecycle payload.
///
/// Never fails: malformed payloads become an error update carrying a
/// diagnostic so the consumer can report them and keep going.
#[must_use]
pub fn decode_lifecycle_event(payload: &[u8]) -> DeviceUpdate {
    match LifecycleEvent::from_json(payload) {
        Ok(event) if event.thing.id.is_empty() => {
            DeviceUpdate::error("lifecycle event is missing a device id")
        }
        Ok(event) => event.into_update(),
        Err(err) => DeviceUpdate::error(format!(
            "malformed lifecycle event ({} bytes): {err}",
            payload.len()
        )),
    }
}

/// Service-wide status report, published on `{service}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Human readable status
    pub message: String,
}

impl ServiceStatus {
    /// Create a status report.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }
}

/// Per-device link status, published on `{service}/thing/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Device and message
    pub thing: DeviceStatusBody,
}

/// Body of a [`DeviceStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatusBody {
    /// Device identifier
    pub id: String,
    /// Human readable status
    pub message: String,
}

impl DeviceStatus {
    /// Create a device status report.
    #[must_use]
    pub fn new(device_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            thing: DeviceStatusBody {
                id: device_id.into(),
                message: message.into(),
            },
        }
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_core::UpdateKind;

    #[test]
    fn decode_new_event() {
        let payload = br#"{
            "action":"new",
            "thing":{
                "type":"device",
                "id":"5930aaf27d6ec25f901d96da",
                "config":[
                    {"key":"rxconfig","value":"[]"},
                    {"key":"txconfig","value":"[]"}]
            }
        }"#;

        let update = decode_lifecycle_event(payload);
        assert_eq!(update.kind, UpdateKind::Add);
        assert_eq!(update.device_id, "5930aaf27d6ec25f901d96da");
        assert_eq!(update.config.len(), 2);
        assert_eq!(update.config["rxconfig"], "[]");
    }

    #[test]
    fn decode_update_and_delete() {
        let update = decode_lifecycle_event(
            br#"{"action":"update","thing":{"id":"d1","config":[{"key":"k","value":"v2"}]}}"#,
        );
        assert_eq!(update.kind, UpdateKind::Update);
        assert_eq!(update.config["k"], "v2");

        let delete = decode_lifecycle_event(br#"{"action":"delete","thing":{"id":"d1"}}"#);
        assert_eq!(delete.kind, UpdateKind::Remove);
        assert_eq!(delete.device_id, "d1");
    }

    #[test]
    fn malformed_payload_becomes_error_update() {
        let update = decode_lifecycle_event(b"not json");
        assert!(update.is_error());

        let unknown = decode_lifecycle_event(br#"{"action":"explode","thing":{"id":"d1"}}"#);
        assert!(unknown.is_error());

        let no_id = decode_lifecycle_event(br#"{"action":"new","thing":{"id":""}}"#);
        assert!(no_id.is_error());
    }

    #[test]
    fn status_payloads() {
        let device = DeviceStatus::new("d1", "Success").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&device).unwrap();
        assert_eq!(value["thing"]["id"], "d1");
        assert_eq!(value["thing"]["message"], "Success");

        let service = ServiceStatus::new("Started").to_json().unwrap();
        assert_eq!(service, br#"{"message":"Started"}"#.to_vec());
    }

    #[test]
    fn event_encodes_wire_action_names() {
        let event = LifecycleEvent {
            action: Action::Delete,
            thing: ThingConfig {
                id: "d1".to_string(),
                config: vec![KeyValuePair::new("k", "v")],
            },
        };
        let json = String::from_utf8(event.to_json().unwrap()).unwrap();
        assert!(json.contains(r#""action":"delete""#));
    }
}
