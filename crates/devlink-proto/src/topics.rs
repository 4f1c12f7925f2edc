//! MQTT topic layout for services and devices.
//!
//! Topic structure:
//! - `{service}/thing/events`: lifecycle events for devices linked to the service
//! - `{service}/thing/status`: per-device link status reports
//! - `{service}/status`: service status reports
//! - `{root}/device/{device_id}/{subtopic}`: device data
//!
//! `{service}` is the pubsub endpoint the directory reports for the
//! service, falling back to `{root}/service/{service_id}`.

use serde::{Deserialize, Serialize};

/// Default topic root.
pub const DEFAULT_ROOT: &str = "openchirp";

/// Topic scheme for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicScheme {
    /// Topic root (default: "openchirp")
    pub root: String,
    /// Service base topic
    pub service: String,
}

impl TopicScheme {
    /// Scheme for a service addressed by its directory-provided endpoint.
    #[must_use]
    pub fn new(root: impl Into<String>, service_topic: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            service: service_topic.into(),
        }
    }

    /// Scheme for a service using the conventional `{root}/service/{id}` endpoint.
    #[must_use]
    pub fn for_service(root: impl Into<String>, service_id: &str) -> Self {
        let root = root.into();
        let service = format!("{root}/service/{service_id}");
        Self { root, service }
    }

    /// Topic for lifecycle events.
    #[must_use]
    pub fn events(&self) -> String {
        format!("{}/thing/events", self.service)
    }

    /// Topic for per-device link status.
    #[must_use]
    pub fn device_status(&self) -> String {
        format!("{}/thing/status", self.service)
    }

    /// Topic for service status.
    #[must_use]
    pub fn status(&self) -> String {
        format!("{}/status", self.service)
    }

    /// Base topic of a device.
    #[must_use]
    pub fn device(&self, device_id: &str) -> String {
        format!("{}/device/{device_id}", self.root)
    }

    /// Full topic of a device subtopic.
    #[must_use]
    pub fn device_topic(&self, device_id: &str, subtopic: &str) -> String {
        format!("{}/{subtopic}", self.device(device_id))
    }

    /// Split a device topic into `(device_id, subtopic)`.
    ///
    /// Returns `None` for topics outside the device namespace or without
    /// a subtopic.
    #[must_use]
    pub fn parse_device<'a>(&self, topic: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = topic
            .strip_prefix(self.root.as_str())?
            .strip_prefix("/device/")?;
        let (device_id, subtopic) = rest.split_once('/')?;
        if device_id.is_empty() || subtopic.is_empty() {
            return None;
        }
        Some((device_id, subtopic))
    }
}

/// Check whether `topic` matches the MQTT topic `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches the parent level
/// and everything below it.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
