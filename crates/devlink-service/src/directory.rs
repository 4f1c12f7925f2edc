//! The directory queries a running service depends on.

use devlink_directory::{DirectoryClient, DirectoryError, LinkedDevice, ServiceNode};
use std::future::Future;

/// Source of service metadata and the linked-device snapshot.
pub trait Directory: Send + Sync {
    /// Fetch the service's description.
    fn service_info(
        &self,
        service_id: &str,
    ) -> impl Future<Output = Result<ServiceNode, DirectoryError>> + Send;

    /// Fetch the devices currently linked to the service.
    fn linked_devices(
        &self,
        service_id: &str,
    ) -> impl Future<Output = Result<Vec<LinkedDevice>, DirectoryError>> + Send;
}

impl Directory for DirectoryClient {
    async fn service_info(&self, service_id: &str) -> Result<ServiceNode, DirectoryError> {
        DirectoryClient::service_info(self, service_id).await
    }

    async fn linked_devices(&self, service_id: &str) -> Result<Vec<LinkedDevice>, DirectoryError> {
        DirectoryClient::linked_devices(self, service_id).await
    }
}
