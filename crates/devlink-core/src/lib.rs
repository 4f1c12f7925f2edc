//! # devlink core
//!
//! Transport-agnostic building blocks for the device link runtime.
//!
//! This crate provides:
//! - The device configuration map and the diff used to classify updates
//! - A typed, capacity-bounded LRU cache
//! - Normalized lifecycle updates and inbound device messages
//! - The `PubSub` trait the runtime uses to reach the transport

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod message;
pub mod transport;
pub mod update;

pub use cache::LruCache;
pub use config::{config_from_pairs, diff, Config, ConfigDiff};
pub use message::Message;
pub use transport::{Incoming, PubSub, TransportError};
pub use update::{DeviceUpdate, UpdateKind};
