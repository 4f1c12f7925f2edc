//! In-process [`PubSub`] for running services without a broker.
//!
//! Publishes are recorded and, when a loopback channel is attached, fed
//! back as [`Incoming`] messages if they match an active subscription.

use devlink_core::{Incoming, PubSub, TransportError};
use devlink_proto::topic_matches;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct Log {
    subscriptions: BTreeSet<String>,
    subscribe_calls: Vec<String>,
    unsubscribe_calls: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
}

/// Recording in-memory transport.
#[derive(Debug, Default)]
pub struct MemoryPubSub {
    log: Mutex<Log>,
    loopback: Option<mpsc::Sender<Incoming>>,
}

impl MemoryPubSub {
    /// A transport that only records calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that also delivers matching publishes back to the
    /// returned receiver.
    #[must_use]
    pub fn with_loopback(capacity: usize) -> (Self, mpsc::Receiver<Incoming>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pubsub = Self {
            log: Mutex::default(),
            loopback: Some(tx),
        };
        (pubsub, rx)
    }

    /// Active subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.log().subscriptions.iter().cloned().collect()
    }

    /// Every topic passed to `subscribe`, in call order.
    #[must_use]
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.log().subscribe_calls.clone()
    }

    /// Every topic passed to `unsubscribe`, in call order.
    #[must_use]
    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.log().unsubscribe_calls.clone()
    }

    /// Every publish, in call order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.log().published.clone()
    }

    /// Payloads published on `topic`, in call order.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.log()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PubSub for MemoryPubSub {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut log = self.log();
        log.subscribe_calls.push(topic.to_string());
        log.subscriptions.insert(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        let mut log = self.log();
        for topic in topics {
            log.unsubscribe_calls.push(topic.clone());
            log.subscriptions.remove(topic);
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let deliver = {
            let mut log = self.log();
            log.published.push((topic.to_string(), payload.clone()));
            log.subscriptions
                .iter()
                .any(|filter| topic_matches(filter, topic))
        };

        if let (true, Some(tx)) = (deliver, &self.loopback) {
            tx.try_send(Incoming::new(topic, payload))
                .map_err(|e| TransportError::Publish {
                    topic: topic.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn records_calls() {
        let pubsub = MemoryPubSub::new();
        assert_ok!(pubsub.subscribe("a/b"));
        assert_ok!(pubsub.publish("a/b", b"x".to_vec()));
        assert_ok!(pubsub.unsubscribe(&["a/b".to_string()]));

        assert_eq!(pubsub.subscribe_calls(), vec!["a/b"]);
        assert_eq!(pubsub.unsubscribe_calls(), vec!["a/b"]);
        assert_eq!(pubsub.published_on("a/b"), vec![b"x".to_vec()]);
        assert!(pubsub.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn loopback_delivers_matching_publishes() {
        let (pubsub, mut rx) = MemoryPubSub::with_loopback(1);
        assert_ok!(pubsub.subscribe("dev/+/rx"));

        assert_ok!(pubsub.publish("dev/d1/tx", b"skip".to_vec()));
        assert_ok!(pubsub.publish("dev/d1/rx", b"hit".to_vec()));

        let incoming = rx.recv().await.unwrap();
        assert_eq!(incoming, Incoming::new("dev/d1/rx", b"hit".to_vec()));

        assert_ok!(pubsub.publish("dev/d2/rx", b"fills".to_vec()));
        assert_err!(pubsub.publish("dev/d3/rx", b"full".to_vec()));
    }
}
