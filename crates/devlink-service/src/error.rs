//! Service runtime errors.

use devlink_core::TransportError;
use devlink_directory::DirectoryError;
use devlink_mqtt::MqttError;
use devlink_proto::MessageError;

/// Errors that can occur while starting or running a service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Directory request failed
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
    /// Transport request failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// MQTT setup failed
    #[error("mqtt error: {0}")]
    Mqtt(#[from] MqttError),
    /// Status payload could not be encoded
    #[error("message error: {0}")]
    Message(#[from] MessageError),
    /// The engine task is gone
    #[error("engine stopped")]
    Stopped,
}
