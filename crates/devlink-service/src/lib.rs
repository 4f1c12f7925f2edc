//! # devlink service runtime
//!
//! Keeps a service's view of its linked devices in step with the
//! framework and routes device traffic to per-device handlers.
//!
//! ## Architecture
//!
//! ```text
//! directory snapshot ─┐
//!                     ├─> UpdateSource ──> bounded queue ──> Engine task ──> DeviceHandler
//! transport publishes ┘                                          │
//!                                                                └─> DeviceControl ──> PubSub
//! ```
//!
//! Lifecycle updates and device messages share one queue and one consumer,
//! so handler callbacks never run concurrently.
//!
//! ## Example
//!
//! ```no_run
//! use devlink_core::Message;
//! use devlink_service::{DeviceControl, DeviceHandler, ManagedService, ServiceConfig};
//!
//! struct Echo;
//!
//! impl DeviceHandler for Echo {
//!     type Key = ();
//!
//!     fn on_link(&mut self, ctrl: &DeviceControl<()>) -> String {
//!         ctrl.subscribe("rx", ());
//!         "Linked".to_string()
//!     }
//!
//!     fn on_message(&mut self, ctrl: &DeviceControl<()>, msg: Message<()>) {
//!         ctrl.publish("tx", msg.into_payload());
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ServiceConfig::from_env()?;
//! let service = ManagedService::connect(&config, || Echo).await?;
//! service.run_until_shutdown().await.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod control;
pub mod directory;
pub mod engine;
pub mod error;
pub mod handler;
pub mod memory;
pub mod service;
pub mod source;
pub mod status;

pub use config::{RuntimeConfig, ServiceConfig};
pub use control::DeviceControl;
pub use directory::Directory;
pub use engine::{Engine, Inbound};
pub use error::ServiceError;
pub use handler::{ConfigAck, DeviceHandler};
pub use memory::MemoryPubSub;
pub use service::ManagedService;
pub use source::UpdateSource;
pub use status::StatusReporter;
