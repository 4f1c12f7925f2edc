//! Update source: merges the directory snapshot and the live events topic
//! into the engine's inbound queue.
//!
//! The events topic is subscribed before the snapshot is fetched, so no
//! live event can fall between the two. Snapshot entries are queued as
//! `Add` updates ahead of anything received live; a device reported by
//! both is folded by the engine's idempotent add.

use crate::directory::Directory;
use crate::engine::Inbound;
use crate::error::ServiceError;
use devlink_core::{DeviceUpdate, Incoming, PubSub};
use devlink_directory::LinkedDevice;
use devlink_proto::{decode_lifecycle_event, TopicScheme};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Running update source.
pub struct UpdateSource {
    pubsub: Arc<dyn PubSub>,
    events: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl UpdateSource {
    /// Subscribe to the events topic, fetch the snapshot and start
    /// forwarding into `queue`.
    ///
    /// Every transport publish arrives on `incoming`. Those on the events
    /// topic become lifecycle updates, all others are queued as device
    /// messages.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription or the snapshot fails. The
    /// events subscription is withdrawn on snapshot failure.
    pub async fn start<D: Directory>(
        pubsub: Arc<dyn PubSub>,
        scheme: &TopicScheme,
        directory: &D,
        service_id: &str,
        incoming: mpsc::Receiver<Incoming>,
        queue: mpsc::Sender<Inbound>,
    ) -> Result<Self, ServiceError> {
        let events = scheme.events();
        pubsub.subscribe(&events)?;
        tracing::debug!(topic = %events, "Subscribed to device events");

        let snapshot = match directory.linked_devices(service_id).await {
            Ok(devices) => devices,
            Err(err) => {
                if let Err(unsub) = pubsub.unsubscribe(&[events]) {
                    tracing::warn!(error = %unsub, "Failed to withdraw events subscription");
                }
                return Err(err.into());
            }
        };
        tracing::info!(service_id, devices = snapshot.len(), "Fetched linked devices");

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(pump(snapshot, events.clone(), incoming, queue, stop_rx));

        Ok(Self {
            pubsub,
            events,
            stop,
            task,
        })
    }

    /// Withdraw the events subscription and wait for the forwarding task.
    ///
    /// Nothing is queued after this returns.
    pub async fn stop(self) {
        if let Err(err) = self.pubsub.unsubscribe(&[self.events]) {
            tracing::warn!(error = %err, "Failed to unsubscribe from device events");
        }

        let _ = self.stop.send(());
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "Update source task failed");
        }
    }
}

impl std::fmt::Debug for UpdateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateSource")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

async fn pump(
    snapshot: Vec<LinkedDevice>,
    events: String,
    mut incoming: mpsc::Receiver<Incoming>,
    queue: mpsc::Sender<Inbound>,
    mut stop: oneshot::Receiver<()>,
) {
    for device in snapshot {
        let config = device.config_map();
        let item = Inbound::Update(DeviceUpdate::add(device.id, config));
        if !forward(&queue, item, &mut stop).await {
            return;
        }
    }

    loop {
        let next = tokio::select! {
            biased;

            _ = &mut stop => break,
            next = incoming.recv() => next,
        };

        let Some(Incoming { topic, payload }) = next else {
            tracing::debug!("Transport channel closed");
            break;
        };

        let item = if topic == events {
            let update = decode_lifecycle_event(&payload);
            tracing::debug!(kind = ?update.kind, device_id = %update.device_id, "Device event");
            Inbound::Update(update)
        } else {
            Inbound::Message(Incoming { topic, payload })
        };

        if !forward(&queue, item, &mut stop).await {
            break;
        }
    }

    tracing::debug!("Update source stopped");
}

/// Queue `item`, waiting for room. Returns false once stopping or when the
/// engine is gone.
async fn forward(
    queue: &mpsc::Sender<Inbound>,
    item: Inbound,
    stop: &mut oneshot::Receiver<()>,
) -> bool {
    tokio::select! {
        biased;

        _ = stop => false,
        sent = queue.send(item) => sent.is_ok(),
    }
}
