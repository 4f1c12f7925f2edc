//! # MQTT transport
//!
//! [`MqttTransport`] implements the runtime's `PubSub` trait on top of
//! rumqttc. Outbound requests are queued without blocking; inbound
//! publishes are forwarded, in arrival order, onto a bounded channel.
//!
//! The transport keeps track of its subscriptions and issues all of them
//! on every ConnAck. Subscribes made while offline wait for the next
//! connection; subscribes that find the request queue full are retried
//! from the event loop.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;

pub use client::{parse_qos, LastWillConfig, MqttConfig, MqttError, MqttTransport};
pub use rumqttc::QoS;
