//! Reference service counting each device's raw traffic.
//!
//! Every message on `rawrx` or `rawtx` bumps a per-device counter that is
//! published on `rawrxcount` or `rawtxcount`. Config changes are declined,
//! so a reconfigured device is relinked and its counters restart.

use devlink_core::Message;
use devlink_service::{DeviceControl, DeviceHandler};

/// Which raw stream a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Rx,
    Tx,
}

#[derive(Debug, Default)]
pub struct Counter {
    rx: u64,
    tx: u64,
}

impl DeviceHandler for Counter {
    type Key = Stream;

    fn on_link(&mut self, ctrl: &DeviceControl<Stream>) -> String {
        ctrl.subscribe("rawrx", Stream::Rx);
        ctrl.subscribe("rawtx", Stream::Tx);
        tracing::debug!(device_id = ctrl.id(), "Counting raw traffic");
        "Success".to_string()
    }

    fn on_message(&mut self, ctrl: &DeviceControl<Stream>, msg: Message<Stream>) {
        let (subtopic, count) = match msg.key() {
            Stream::Rx => {
                self.rx += 1;
                ("rawrxcount", self.rx)
            }
            Stream::Tx => {
                self.tx += 1;
                ("rawtxcount", self.tx)
            }
        };
        ctrl.publish(subtopic, count.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_core::{config_from_pairs, Config, DeviceUpdate, Incoming, PubSub};
    use devlink_proto::TopicScheme;
    use devlink_service::{Engine, Inbound, MemoryPubSub};
    use std::sync::Arc;

    fn engine() -> (Engine<Counter>, Arc<MemoryPubSub>) {
        let pubsub = Arc::new(MemoryPubSub::new());
        let engine = Engine::new(
            TopicScheme::for_service("openchirp", "counter"),
            Arc::clone(&pubsub) as Arc<dyn PubSub>,
            100,
            Counter::default,
        );
        (engine, pubsub)
    }

    fn raw(device: &str, stream: &str) -> Inbound {
        Inbound::Message(Incoming::new(
            format!("openchirp/device/{device}/{stream}"),
            b"\x00".to_vec(),
        ))
    }

    #[test]
    fn counts_per_device_and_stream() {
        let (mut engine, pubsub) = engine();
        engine.apply(Inbound::Update(DeviceUpdate::add("d1", config_from_pairs([("a", "1")]))));
        engine.apply(Inbound::Update(DeviceUpdate::add("d2", Config::new())));

        engine.apply(raw("d1", "rawrx"));
        engine.apply(raw("d1", "rawrx"));
        engine.apply(raw("d1", "rawtx"));
        engine.apply(raw("d2", "rawrx"));

        assert_eq!(
            pubsub.published_on("openchirp/device/d1/rawrxcount"),
            vec![b"1".to_vec(), b"2".to_vec()]
        );
        assert_eq!(
            pubsub.published_on("openchirp/device/d1/rawtxcount"),
            vec![b"1".to_vec()]
        );
        assert_eq!(
            pubsub.published_on("openchirp/device/d2/rawrxcount"),
            vec![b"1".to_vec()]
        );
    }

    #[test]
    fn config_change_restarts_counters() {
        let (mut engine, pubsub) = engine();
        engine.apply(Inbound::Update(DeviceUpdate::add("d1", config_from_pairs([("a", "1")]))));
        engine.apply(raw("d1", "rawrx"));
        engine.apply(Inbound::Update(DeviceUpdate::update("d1", config_from_pairs([("a", "2")]))));
        engine.apply(raw("d1", "rawrx"));

        assert_eq!(
            pubsub.published_on("openchirp/device/d1/rawrxcount"),
            vec![b"1".to_vec(), b"1".to_vec()]
        );
        assert_eq!(engine.device_config("d1").unwrap()["a"], "2");
    }
}
