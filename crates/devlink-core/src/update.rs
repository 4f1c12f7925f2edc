//! Normalized device lifecycle updates.

use crate::config::Config;
use serde::{Deserialize, Serialize};

/// What happened to a device's link with this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// The device linked this service
    Add,
    /// The device changed its service config
    Update,
    /// The device unlinked this service
    Remove,
    /// An update could not be decoded; carries a diagnostic
    Error(String),
}

/// A single lifecycle event for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    /// Event type
    pub kind: UpdateKind,
    /// Device identifier (empty for [`UpdateKind::Error`])
    pub device_id: String,
    /// Full service config carried by the event
    pub config: Config,
}

impl DeviceUpdate {
    /// A device linked with the given config.
    #[must_use]
    pub fn add(device_id: impl Into<String>, config: Config) -> Self {
        Self {
            kind: UpdateKind::Add,
            device_id: device_id.into(),
            config,
        }
    }

    /// A linked device's config changed.
    #[must_use]
    pub fn update(device_id: impl Into<String>, config: Config) -> Self {
        Self {
            kind: UpdateKind::Update,
            device_id: device_id.into(),
            config,
        }
    }

    /// A device unlinked.
    #[must_use]
    pub fn remove(device_id: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Remove,
            device_id: device_id.into(),
            config: Config::new(),
        }
    }

    /// An undecodable event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Error(message.into()),
            device_id: String::new(),
            config: Config::new(),
        }
    }

    /// True for [`UpdateKind::Error`] events.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.kind, UpdateKind::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_from_pairs;

    #[test]
    fn constructors() {
        let add = DeviceUpdate::add("d1", config_from_pairs([("k", "v")]));
        assert_eq!(add.kind, UpdateKind::Add);
        assert_eq!(add.device_id, "d1");
        assert_eq!(add.config["k"], "v");

        let rem = DeviceUpdate::remove("d1");
        assert_eq!(rem.kind, UpdateKind::Remove);
        assert!(rem.config.is_empty());
        assert!(!rem.is_error());

        let err = DeviceUpdate::error("bad payload");
        assert!(err.is_error());
        assert!(err.device_id.is_empty());
        assert_eq!(err.kind, UpdateKind::Error("bad payload".to_string()));
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&UpdateKind::Remove).unwrap();
        assert_eq!(json, "\"remove\"");
    }
}
