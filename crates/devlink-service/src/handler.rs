//! Application callbacks for linked devices.

use crate::control::DeviceControl;
use devlink_core::{Config, Message};
use std::fmt;

/// Outcome of [`DeviceHandler::on_config_change`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAck {
    /// The change was applied in place; carries the status to report.
    Accepted(String),
    /// The handler cannot apply the change incrementally. The device is
    /// unlinked and linked again with the new config.
    Declined,
}

/// Per-device application logic.
///
/// One handler is built by the service's factory each time a device links
/// and dropped when it unlinks. All callbacks run on the engine task, one
/// at a time, so a slow callback delays every other device.
pub trait DeviceHandler: Send + 'static {
    /// Token handed back with messages from a subscribed subtopic.
    type Key: Clone + fmt::Debug + Send + Sync + 'static;

    /// The device linked this service. Returns the status to report.
    fn on_link(&mut self, ctrl: &DeviceControl<Self::Key>) -> String;

    /// The device is about to be unlinked.
    ///
    /// Subscriptions left open here are removed by the engine afterwards.
    fn on_unlink(&mut self, ctrl: &DeviceControl<Self::Key>) {
        let _ = ctrl;
    }

    /// The device's config changed.
    ///
    /// `changes` holds new and modified keys; `original` is the config
    /// before the change. [`DeviceControl::config`] already returns the
    /// new config while this runs.
    fn on_config_change(
        &mut self,
        ctrl: &DeviceControl<Self::Key>,
        changes: &Config,
        original: &Config,
    ) -> ConfigAck {
        let _ = (ctrl, changes, original);
        ConfigAck::Declined
    }

    /// A message arrived on one of the device's subscriptions.
    fn on_message(&mut self, ctrl: &DeviceControl<Self::Key>, msg: Message<Self::Key>);
}
