//! Device-scoped capability handed to handler callbacks.

use devlink_core::{Config, PubSub};
use devlink_proto::topic_matches;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Link state of one device, shared between the engine's device table and
/// every control handed out for it.
pub(crate) struct DeviceLink<K> {
    id: String,
    topic: String,
    config: Mutex<Config>,
    subscriptions: Mutex<BTreeMap<String, K>>,
}

impl<K: Clone> DeviceLink<K> {
    pub(crate) fn new(id: impl Into<String>, topic: impl Into<String>, config: Config) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            config: Mutex::new(config),
            subscriptions: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn config(&self) -> Config {
        lock(&self.config).clone()
    }

    pub(crate) fn set_config(&self, config: Config) {
        *lock(&self.config) = config;
    }

    /// Resolve the key of the subscription an inbound topic belongs to.
    ///
    /// An exact subscription wins over wildcard filters.
    pub(crate) fn key_for(&self, topic: &str) -> Option<K> {
        let subs = lock(&self.subscriptions);
        if let Some(key) = subs.get(topic) {
            return Some(key.clone());
        }
        subs.iter()
            .find(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, key)| key.clone())
    }

    /// `topic` relative to the device prefix.
    pub(crate) fn relative<'a>(&self, topic: &'a str) -> &'a str {
        topic
            .strip_prefix(self.topic.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(topic)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle through which a device handler inspects its config and talks to
/// the device's topics.
///
/// Every topic argument is relative to the device's base topic. Controls
/// are cheap to clone; all clones act on the same link.
pub struct DeviceControl<K> {
    link: Arc<DeviceLink<K>>,
    pubsub: Arc<dyn PubSub>,
}

impl<K: Clone> DeviceControl<K> {
    pub(crate) fn new(link: Arc<DeviceLink<K>>, pubsub: Arc<dyn PubSub>) -> Self {
        Self { link, pubsub }
    }

    /// Device identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.link.id
    }

    /// Base topic of the device.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.link.topic
    }

    /// Snapshot of the device's current config.
    #[must_use]
    pub fn config(&self) -> Config {
        self.link.config()
    }

    /// Subscribe to `subtopic`, tagging its messages with `key`.
    ///
    /// Subscribing to an already subscribed subtopic does nothing; the
    /// original key is kept. Transport failures are logged.
    pub fn subscribe(&self, subtopic: &str, key: K) {
        let topic = self.full_topic(subtopic);
        {
            let mut subs = lock(&self.link.subscriptions);
            if subs.contains_key(&topic) {
                return;
            }
            subs.insert(topic.clone(), key);
        }

        tracing::debug!(device_id = %self.link.id, topic, "Device subscribe");
        if let Err(err) = self.pubsub.subscribe(&topic) {
            tracing::warn!(error = %err, device_id = %self.link.id, "Device subscribe failed");
        }
    }

    /// Unsubscribe from each of `subtopics`. Subtopics that were never
    /// subscribed are ignored.
    pub fn unsubscribe(&self, subtopics: &[&str]) {
        let topics: Vec<String> = {
            let mut subs = lock(&self.link.subscriptions);
            subtopics
                .iter()
                .map(|sub| self.full_topic(sub))
                .filter(|topic| subs.remove(topic).is_some())
                .collect()
        };
        self.release(&topics);
    }

    /// Drop every subscription of the device.
    pub fn unsubscribe_all(&self) {
        let topics: Vec<String> = std::mem::take(&mut *lock(&self.link.subscriptions))
            .into_keys()
            .collect();
        self.release(&topics);
    }

    /// Subtopics currently subscribed, in order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.link.subscriptions)
            .keys()
            .map(|topic| self.link.relative(topic).to_string())
            .collect()
    }

    /// Publish `payload` on `subtopic`. Transport failures are logged.
    pub fn publish(&self, subtopic: &str, payload: impl Into<Vec<u8>>) {
        let topic = self.full_topic(subtopic);
        if let Err(err) = self.pubsub.publish(&topic, payload.into()) {
            tracing::warn!(error = %err, device_id = %self.link.id, "Device publish failed");
        }
    }

    /// True if both controls act on the same link.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.link, &other.link)
    }

    pub(crate) fn is_bound_to(&self, link: &Arc<DeviceLink<K>>) -> bool {
        Arc::ptr_eq(&self.link, link)
    }

    fn full_topic(&self, subtopic: &str) -> String {
        format!("{}/{subtopic}", self.link.topic)
    }

    fn release(&self, topics: &[String]) {
        if topics.is_empty() {
            return;
        }
        tracing::debug!(device_id = %self.link.id, count = topics.len(), "Device unsubscribe");
        if let Err(err) = self.pubsub.unsubscribe(topics) {
            tracing::warn!(error = %err, device_id = %self.link.id, "Device unsubscribe failed");
        }
    }
}

impl<K> Clone for DeviceControl<K> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
            pubsub: Arc::clone(&self.pubsub),
        }
    }
}

impl<K> fmt::Debug for DeviceControl<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceControl")
            .field("id", &self.link.id)
            .field("topic", &self.link.topic)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPubSub;
    use devlink_core::config_from_pairs;

    fn control(pubsub: &Arc<MemoryPubSub>) -> DeviceControl<u8> {
        let link = Arc::new(DeviceLink::new(
            "d1",
            "openchirp/device/d1",
            config_from_pairs([("k", "v")]),
        ));
        DeviceControl::new(link, Arc::clone(pubsub) as Arc<dyn PubSub>)
    }

    #[test]
    fn subscribe_is_idempotent() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let ctrl = control(&pubsub);

        ctrl.subscribe("rawrx", 0);
        ctrl.subscribe("rawrx", 1);

        assert_eq!(pubsub.subscribe_calls(), vec!["openchirp/device/d1/rawrx"]);
        assert_eq!(ctrl.subscriptions(), vec!["rawrx"]);
        assert_eq!(ctrl.link.key_for("openchirp/device/d1/rawrx"), Some(0));
    }

    #[test]
    fn unsubscribe_ignores_unknown_subtopics() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let ctrl = control(&pubsub);

        ctrl.unsubscribe(&["never"]);
        assert!(pubsub.unsubscribe_calls().is_empty());

        ctrl.subscribe("a", 0);
        ctrl.subscribe("b", 1);
        ctrl.unsubscribe(&["a", "never"]);
        assert_eq!(pubsub.unsubscribe_calls(), vec!["openchirp/device/d1/a"]);
        assert_eq!(ctrl.subscriptions(), vec!["b"]);
    }

    #[test]
    fn unsubscribe_all_clears_bookkeeping() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let ctrl = control(&pubsub);
        ctrl.subscribe("a", 0);
        ctrl.subscribe("b", 1);

        ctrl.unsubscribe_all();
        ctrl.unsubscribe_all();

        assert_eq!(
            pubsub.unsubscribe_calls(),
            vec!["openchirp/device/d1/a", "openchirp/device/d1/b"]
        );
        assert!(ctrl.subscriptions().is_empty());
        assert!(pubsub.subscriptions().is_empty());
    }

    #[test]
    fn publish_prefixes_device_topic() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let ctrl = control(&pubsub);

        ctrl.publish("rawrxcount", "3");

        assert_eq!(
            pubsub.published(),
            vec![("openchirp/device/d1/rawrxcount".to_string(), b"3".to_vec())]
        );
    }

    #[test]
    fn wildcard_subscription_resolves_key() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let ctrl = control(&pubsub);
        ctrl.subscribe("transducer/+", 7);
        ctrl.subscribe("transducer/temp", 8);

        assert_eq!(ctrl.link.key_for("openchirp/device/d1/transducer/temp"), Some(8));
        assert_eq!(ctrl.link.key_for("openchirp/device/d1/transducer/hum"), Some(7));
        assert_eq!(ctrl.link.key_for("openchirp/device/d1/other"), None);
        assert_eq!(
            ctrl.link.relative("openchirp/device/d1/transducer/hum"),
            "transducer/hum"
        );
    }

    #[test]
    fn clones_share_the_link() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let ctrl = control(&pubsub);
        let other = ctrl.clone();
        assert!(ctrl.ptr_eq(&other));

        other.link.set_config(config_from_pairs([("k", "v2")]));
        assert_eq!(ctrl.config()["k"], "v2");
        assert_eq!(ctrl.id(), "d1");
        assert_eq!(ctrl.topic(), "openchirp/device/d1");
    }
}
