//! # Directory client
//!
//! HTTP client for the framework's directory service, which knows every
//! service and device, their pubsub endpoints, and which devices are
//! currently linked to a service along with their service config.
//!
//! All requests authenticate with HTTP basic auth, using the service id
//! and token as credentials.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod types;

pub use client::{DirectoryClient, DirectoryClientConfig, DirectoryError};
pub use types::{DeviceNode, HealthStatus, LinkedDevice, LinkedService, PubSubEndpoint, ServiceNode};
