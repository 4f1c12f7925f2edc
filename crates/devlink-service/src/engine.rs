//! Reconciliation engine.
//!
//! The engine owns the table of linked devices. It applies lifecycle
//! updates and dispatches device messages strictly one at a time, in the
//! order they are pulled from its inbound queue.
//!
//! Per device there are two states, unlinked (no entry) and linked:
//!
//! - `Add`/`Update` on an unlinked device links it.
//! - `Add`/`Update` on a linked device diffs the configs. Dropped keys
//!   force an unlink/link cycle, an empty diff is a no-op, anything else
//!   goes to [`DeviceHandler::on_config_change`].
//! - `Remove` on a linked device unlinks it, dropping its subscriptions
//!   and its cached control.
//! - `Error` updates are logged and never applied.

use crate::control::{DeviceControl, DeviceLink};
use crate::handler::{ConfigAck, DeviceHandler};
use crate::status::StatusReporter;
use devlink_core::{diff, Config, DeviceUpdate, Incoming, LruCache, Message, PubSub, UpdateKind};
use devlink_proto::TopicScheme;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// An item on the engine's inbound queue.
#[derive(Debug)]
pub enum Inbound {
    /// Lifecycle update for one device
    Update(DeviceUpdate),
    /// Publish received on a device topic
    Message(Incoming),
    /// Request for the linked devices and their configs
    Inspect(oneshot::Sender<BTreeMap<String, Config>>),
}

struct DeviceState<H: DeviceHandler> {
    link: Arc<DeviceLink<H::Key>>,
    handler: H,
}

/// Factory building one handler per linked device.
pub type HandlerFactory<H> = Box<dyn FnMut() -> H + Send>;

/// Single-consumer device table.
pub struct Engine<H: DeviceHandler> {
    scheme: TopicScheme,
    pubsub: Arc<dyn PubSub>,
    status: StatusReporter,
    factory: HandlerFactory<H>,
    devices: HashMap<String, DeviceState<H>>,
    controls: LruCache<String, DeviceControl<H::Key>>,
}

impl<H: DeviceHandler> Engine<H> {
    /// Create an engine with no linked devices.
    #[must_use]
    pub fn new<F>(
        scheme: TopicScheme,
        pubsub: Arc<dyn PubSub>,
        cache_capacity: usize,
        factory: F,
    ) -> Self
    where
        F: FnMut() -> H + Send + 'static,
    {
        let status = StatusReporter::new(Arc::clone(&pubsub), &scheme);
        Self {
            scheme,
            pubsub,
            status,
            factory: Box::new(factory),
            devices: HashMap::new(),
            controls: LruCache::new(cache_capacity),
        }
    }

    /// Number of linked devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// True if `device_id` is linked.
    #[must_use]
    pub fn is_linked(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Current config of a linked device.
    #[must_use]
    pub fn device_config(&self, device_id: &str) -> Option<Config> {
        self.devices.get(device_id).map(|state| state.link.config())
    }

    /// Linked devices and their configs.
    #[must_use]
    pub fn devices(&self) -> BTreeMap<String, Config> {
        self.devices
            .iter()
            .map(|(id, state)| (id.clone(), state.link.config()))
            .collect()
    }

    /// Control for a linked device, served from the cache when possible.
    pub fn control(&mut self, device_id: &str) -> Option<DeviceControl<H::Key>> {
        let state = self.devices.get(device_id)?;

        if let Some(ctrl) = self.controls.get(device_id) {
            let bound = ctrl.is_bound_to(&state.link);
            debug_assert!(bound, "cached control for {device_id} outlived its device");
            if bound {
                return Some(ctrl.clone());
            }
            tracing::warn!(device_id, "Discarding stale cached control");
        }

        let ctrl = DeviceControl::new(Arc::clone(&state.link), Arc::clone(&self.pubsub));
        if let Some((evicted, _)) = self.controls.put(device_id.to_string(), ctrl.clone()) {
            tracing::trace!(device_id = %evicted, "Evicted cached control");
        }
        Some(ctrl)
    }

    /// Apply one inbound item.
    pub fn apply(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Update(update) => self.apply_update(update),
            Inbound::Message(incoming) => self.dispatch(incoming),
            Inbound::Inspect(reply) => {
                let _ = reply.send(self.devices());
            }
        }
    }

    /// Pull from `inbound` until `shutdown` fires or the queue closes.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        tracing::info!(service = %self.scheme.service, "Engine running");

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    break;
                }

                next = inbound.recv() => {
                    let Some(item) = next else {
                        tracing::debug!("Inbound queue closed");
                        break;
                    };
                    self.apply(item);
                }
            }
        }

        tracing::info!(devices = self.devices.len(), "Engine stopped");
    }

    fn apply_update(&mut self, update: DeviceUpdate) {
        let DeviceUpdate {
            kind,
            device_id,
            config,
        } = update;

        match kind {
            UpdateKind::Add | UpdateKind::Update => self.link_or_update(&device_id, config),
            UpdateKind::Remove => {
                if self.is_linked(&device_id) {
                    self.unlink(&device_id);
                } else {
                    tracing::debug!(device_id, "Remove for unlinked device ignored");
                }
            }
            UpdateKind::Error(message) => {
                tracing::warn!(error = %message, "Received malformed device update");
            }
        }
    }

    fn link_or_update(&mut self, device_id: &str, config: Config) {
        let Some(current) = self.device_config(device_id) else {
            self.link(device_id, config);
            return;
        };

        let delta = diff(&current, &config);
        if delta.incomplete {
            tracing::info!(device_id, "Config update dropped keys, relinking");
            self.relink(device_id, config);
            return;
        }
        if delta.changes.is_empty() {
            tracing::debug!(device_id, "Config unchanged");
            return;
        }

        let Some(ctrl) = self.control(device_id) else {
            return;
        };
        let Some(state) = self.devices.get_mut(device_id) else {
            return;
        };

        state.link.set_config(config.clone());
        match state
            .handler
            .on_config_change(&ctrl, &delta.changes, &current)
        {
            ConfigAck::Accepted(status) => {
                tracing::info!(device_id, changed = delta.changes.len(), "Config updated");
                self.report(device_id, &status);
            }
            ConfigAck::Declined => {
                tracing::debug!(device_id, "Config change declined, relinking");
                state.link.set_config(current);
                self.relink(device_id, config);
            }
        }
    }

    fn relink(&mut self, device_id: &str, config: Config) {
        self.unlink(device_id);
        self.link(device_id, config);
    }

    fn link(&mut self, device_id: &str, config: Config) {
        let link = Arc::new(DeviceLink::new(
            device_id,
            self.scheme.device(device_id),
            config,
        ));
        let handler = (self.factory)();
        let previous = self
            .devices
            .insert(device_id.to_string(), DeviceState { link, handler });
        debug_assert!(previous.is_none(), "{device_id} linked twice");

        let Some(ctrl) = self.control(device_id) else {
            return;
        };
        let Some(state) = self.devices.get_mut(device_id) else {
            return;
        };

        let status = state.handler.on_link(&ctrl);
        tracing::info!(device_id, "Device linked");
        self.report(device_id, &status);
    }

    fn unlink(&mut self, device_id: &str) {
        let Some(ctrl) = self.control(device_id) else {
            return;
        };
        if let Some(state) = self.devices.get_mut(device_id) {
            state.handler.on_unlink(&ctrl);
        }

        ctrl.unsubscribe_all();
        self.devices.remove(device_id);
        self.controls.remove(device_id);
        tracing::info!(device_id, "Device unlinked");
    }

    fn dispatch(&mut self, incoming: Incoming) {
        let Incoming { topic, payload } = incoming;

        let Some((device_id, _)) = self.scheme.parse_device(&topic) else {
            tracing::debug!(topic, "Message outside device namespace dropped");
            return;
        };
        let Some(state) = self.devices.get(device_id) else {
            tracing::debug!(device_id, "Message for unlinked device dropped");
            return;
        };
        let Some(key) = state.link.key_for(&topic) else {
            tracing::debug!(device_id, topic, "Message without subscription dropped");
            return;
        };
        let subtopic = state.link.relative(&topic).to_string();

        let Some(ctrl) = self.control(device_id) else {
            return;
        };
        if let Some(state) = self.devices.get_mut(device_id) {
            state.handler.on_message(&ctrl, Message::new(key, subtopic, payload));
        }
    }

    fn report(&self, device_id: &str, status: &str) {
        if let Err(err) = self.status.report_device(device_id, status) {
            tracing::warn!(error = %err, device_id, "Failed to report device status");
        }
    }
}
