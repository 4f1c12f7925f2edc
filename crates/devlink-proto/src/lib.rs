//! # devlink protocol
//!
//! Wire formats exchanged with the framework over MQTT, and the topic
//! layout used to address services and devices.
//!
//! ## Messages
//!
//! - `LifecycleEvent`: device link/update/unlink notification on the
//!   service's events topic
//! - `ServiceStatus` / `DeviceStatus`: status reports published by the service
//!
//! ## MQTT Topics
//!
//! - Service: `{service}/thing/events`, `{service}/thing/status`, `{service}/status`
//! - Device: `{root}/device/{device_id}/{subtopic}`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod topics;

pub use messages::{
    decode_lifecycle_event, pairs_to_config, Action, DeviceStatus, DeviceStatusBody, KeyValuePair,
    LifecycleEvent, MessageError, ServiceStatus, ThingConfig,
};
pub use topics::{topic_matches, TopicScheme};
