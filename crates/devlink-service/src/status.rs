//! Status reports published on the service's status topics.

use crate::error::ServiceError;
use devlink_core::PubSub;
use devlink_proto::{DeviceStatus, ServiceStatus, TopicScheme};
use std::sync::Arc;

/// Publishes device and service status reports.
#[derive(Clone)]
pub struct StatusReporter {
    pubsub: Arc<dyn PubSub>,
    device_topic: String,
    service_topic: String,
}

impl StatusReporter {
    /// Reporter for the service addressed by `scheme`.
    #[must_use]
    pub fn new(pubsub: Arc<dyn PubSub>, scheme: &TopicScheme) -> Self {
        Self {
            pubsub,
            device_topic: scheme.device_status(),
            service_topic: scheme.status(),
        }
    }

    /// Report the status of one device.
    ///
    /// # Errors
    ///
    /// Returns error if the report cannot be encoded or published.
    pub fn report_device(&self, device_id: &str, message: &str) -> Result<(), ServiceError> {
        let payload = DeviceStatus::new(device_id, message).to_json()?;
        self.pubsub.publish(&self.device_topic, payload)?;
        Ok(())
    }

    /// Report the status of the service itself.
    ///
    /// # Errors
    ///
    /// Returns error if the report cannot be encoded or published.
    pub fn report_service(&self, message: &str) -> Result<(), ServiceError> {
        let payload = ServiceStatus::new(message).to_json()?;
        self.pubsub.publish(&self.service_topic, payload)?;
        Ok(())
    }
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter")
            .field("device_topic", &self.device_topic)
            .field("service_topic", &self.service_topic)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPubSub;

    #[test]
    fn reports_go_to_status_topics() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let scheme = TopicScheme::for_service("openchirp", "svc");
        let reporter = StatusReporter::new(Arc::clone(&pubsub) as Arc<dyn PubSub>, &scheme);

        reporter.report_device("d1", "Linked").unwrap();
        reporter.report_service("Started").unwrap();

        let device: serde_json::Value = serde_json::from_slice(
            &pubsub.published_on("openchirp/service/svc/thing/status")[0],
        )
        .unwrap();
        assert_eq!(device["thing"]["id"], "d1");
        assert_eq!(device["thing"]["message"], "Linked");

        let service: serde_json::Value =
            serde_json::from_slice(&pubsub.published_on("openchirp/service/svc/status")[0])
                .unwrap();
        assert_eq!(service["message"], "Started");
    }
}
