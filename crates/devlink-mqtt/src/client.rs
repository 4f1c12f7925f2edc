//! rumqttc-backed transport.

use devlink_core::{Incoming, PubSub, TransportError};
use rumqttc::{
    AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS, SubscribeFilter,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

/// Message published by the broker if the connection drops unexpectedly.
#[derive(Debug, Clone)]
pub struct LastWillConfig {
    /// Topic to publish on
    pub topic: String,
    /// Payload to publish
    pub payload: Vec<u8>,
}

/// Configuration for the MQTT transport.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// MQTT broker URL (e.g., <tcp://localhost:1883>)
    pub broker_url: String,
    /// Prefix for the randomly generated client id
    pub client_id_prefix: String,
    /// Broker user name
    pub username: Option<String>,
    /// Broker password
    pub password: Option<String>,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// QoS used for every subscribe and publish
    pub qos: QoS,
    /// Optional last will
    pub last_will: Option<LastWillConfig>,
    /// Capacity of the inbound message channel
    pub channel_capacity: usize,
    /// Delay before polling again after a connection error
    pub reconnect_delay: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".to_string(),
            client_id_prefix: "devlink-".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            qos: QoS::ExactlyOnce,
            last_will: None,
            channel_capacity: 100,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Topics per SUBSCRIBE packet when restoring subscriptions.
const RESTORE_BATCH: usize = 32;

/// Subscription bookkeeping shared with the event loop.
///
/// Every tracked topic is issued again on each ConnAck. While connected,
/// topics whose request could not be queued wait in `pending` until the
/// event loop drains them.
#[derive(Debug, Default)]
struct Subscriptions {
    tracked: BTreeSet<String>,
    pending: BTreeSet<String>,
    connected: bool,
}

impl Subscriptions {
    /// Track `topic`, sending it now when connected. A failed send is
    /// retried by the event loop.
    fn subscribe<E>(&mut self, topic: &str, send: impl FnOnce(&str) -> Result<(), E>) {
        self.tracked.insert(topic.to_string());
        if !self.connected {
            return;
        }
        if send(topic).is_err() {
            tracing::debug!(topic, "Request queue full, deferring subscribe");
            self.pending.insert(topic.to_string());
        }
    }

    /// Stop tracking `topics`. A topic stays tracked when its UNSUBSCRIBE
    /// could not be queued; the first such failure is returned after every
    /// topic has been attempted.
    fn unsubscribe<E: std::fmt::Display>(
        &mut self,
        topics: &[String],
        mut send: impl FnMut(&str) -> Result<(), E>,
    ) -> Result<(), TransportError> {
        let mut first_error = None;
        for topic in topics {
            let never_sent = self.pending.remove(topic);
            if !self.connected || never_sent {
                self.tracked.remove(topic);
                continue;
            }
            match send(topic) {
                Ok(()) => {
                    self.tracked.remove(topic);
                }
                Err(e) => {
                    tracing::warn!(error = %e, topic, "Failed to unsubscribe");
                    first_error.get_or_insert_with(|| TransportError::Unsubscribe {
                        topic: topic.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Mark the connection up and issue every tracked topic in batches.
    fn connected<E>(&mut self, mut send: impl FnMut(&[String]) -> Result<(), E>) {
        self.connected = true;
        self.pending.clear();
        let topics: Vec<String> = self.tracked.iter().cloned().collect();
        for batch in topics.chunks(RESTORE_BATCH) {
            if send(batch).is_err() {
                self.pending.extend(batch.iter().cloned());
            }
        }
    }

    /// Mark the connection down. The next ConnAck reissues everything.
    fn disconnected(&mut self) {
        self.connected = false;
        self.pending.clear();
    }

    /// Retry deferred subscribes, keeping them if the queue is still full.
    fn flush<E>(&mut self, send: impl FnOnce(&[String]) -> Result<(), E>) {
        if !self.connected || self.pending.is_empty() {
            return;
        }
        let batch: Vec<String> = self.pending.iter().take(RESTORE_BATCH).cloned().collect();
        if send(&batch).is_ok() {
            for topic in &batch {
                self.pending.remove(topic);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    subscriptions: Mutex<Subscriptions>,
    closing: AtomicBool,
}

impl Shared {
    fn subscriptions(&self) -> std::sync::MutexGuard<'_, Subscriptions> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

fn filters(topics: &[String], qos: QoS) -> Vec<SubscribeFilter> {
    topics
        .iter()
        .map(|topic| SubscribeFilter::new(topic.clone(), qos))
        .collect()
}

/// MQTT connection implementing [`PubSub`].
pub struct MqttTransport {
    client: AsyncClient,
    qos: QoS,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create the client and start driving its event loop.
    ///
    /// Must be called from within a tokio runtime. Returns the transport
    /// and the receiver of inbound publishes.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn connect(config: &MqttConfig) -> Result<(Self, mpsc::Receiver<Incoming>), MqttError> {
        let (host, port) = parse_mqtt_url(&config.broker_url)?;
        let client_id = generate_client_id(&config.client_id_prefix);

        let mut mqtt_options = MqttOptions::new(&client_id, host.as_str(), port);
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some(user) = config.username.as_deref().filter(|u| !u.is_empty()) {
            mqtt_options.set_credentials(user, config.password.as_deref().unwrap_or_default());
        }

        if let Some(will) = &config.last_will {
            mqtt_options.set_last_will(LastWill::new(
                will.topic.as_str(),
                will.payload.clone(),
                config.qos,
                false,
            ));
        }

        tracing::info!(client_id, host, port, "Connecting to MQTT broker");

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let shared = Arc::new(Shared::default());

        let task = tokio::spawn(drive(
            eventloop,
            client.clone(),
            config.qos,
            Arc::clone(&shared),
            tx,
            config.reconnect_delay,
        ));

        Ok((
            Self {
                client,
                qos: config.qos,
                shared,
                task: Mutex::new(Some(task)),
            },
            rx,
        ))
    }

    /// Topics currently subscribed through this transport.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.subscriptions().tracked.iter().cloned().collect()
    }

    /// Disconnect from the broker and stop the event loop.
    ///
    /// Later calls are no-ops.
    pub async fn disconnect(&self) {
        let Some(mut task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        self.shared.closing.store(true, Ordering::SeqCst);

        if let Err(err) = self.client.disconnect().await {
            tracing::warn!(error = %err, "Failed to send MQTT disconnect");
        }

        if tokio::time::timeout(Duration::from_secs(1), &mut task)
            .await
            .is_err()
        {
            task.abort();
        }

        tracing::info!("Disconnected from MQTT broker");
    }
}

impl PubSub for MqttTransport {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if self.shared.closed() {
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                message: "transport closed".to_string(),
            });
        }
        tracing::debug!(topic, "Subscribing");
        self.shared
            .subscriptions()
            .subscribe(topic, |topic| self.client.try_subscribe(topic, self.qos));
        Ok(())
    }

    fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        tracing::debug!(count = topics.len(), "Unsubscribing");
        self.shared
            .subscriptions()
            .unsubscribe(topics, |topic| self.client.try_unsubscribe(topic))
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        tracing::trace!(topic, payload_len = payload.len(), "Publishing");
        self.client
            .try_publish(topic, self.qos, false, payload)
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

/// Poll the event loop, forwarding publishes and issuing subscriptions on
/// every connection.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    qos: QoS,
    shared: Arc<Shared>,
    tx: mpsc::Sender<Incoming>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(
                    topic = %publish.topic,
                    payload_len = publish.payload.len(),
                    "Received MQTT message"
                );

                let incoming = Incoming::new(publish.topic, publish.payload.to_vec());
                if tx.send(incoming).await.is_err() {
                    tracing::debug!("Inbound receiver dropped, stopping event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::info!(session_present = ack.session_present, "Connected to MQTT broker");

                let mut subscriptions = shared.subscriptions();
                tracing::info!(count = subscriptions.tracked.len(), "Restoring subscriptions");
                subscriptions.connected(|batch| client.try_subscribe_many(filters(batch, qos)));
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                tracing::debug!("Subscription acknowledged");
            }
            Ok(_) => {}
            Err(e) => {
                shared.subscriptions().disconnected();
                if shared.closed() {
                    break;
                }
                tracing::error!(error = %e, "MQTT error");
                tokio::time::sleep(reconnect_delay).await;
                continue;
            }
        }

        shared
            .subscriptions()
            .flush(|batch| client.try_subscribe_many(filters(batch, qos)));
    }

    shared.closing.store(true, Ordering::SeqCst);
}

/// Generate a client id with a short random suffix.
fn generate_client_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &suffix[..8])
}

/// Parse a QoS level from `0`/`1`/`2` or its name.
#[must_use]
pub fn parse_qos(input: &str) -> Option<QoS> {
    match input {
        "0" | "AtMostOnce" | "QoSAtMostOnce" => Some(QoS::AtMostOnce),
        "1" | "AtLeastOnce" | "QoSAtLeastOnce" => Some(QoS::AtLeastOnce),
        "2" | "ExactlyOnce" | "QoSExactlyOnce" => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Parse MQTT URL into host and port.
fn parse_mqtt_url(input: &str) -> Result<(String, u16), MqttError> {
    if input.contains("://") {
        let url = Url::parse(input).map_err(|e| MqttError::InvalidUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(MqttError::InvalidUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| MqttError::InvalidUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MqttError::InvalidUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port
            .parse()
            .map_err(|_| MqttError::InvalidUrl(format!("{input}: invalid port '{port}'")))?,
    };
    if parts.next().is_some() {
        return Err(MqttError::InvalidUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

/// Errors that can occur setting up the transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MqttError {
    /// Invalid MQTT URL
    #[error("invalid MQTT URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn parse_mqtt_url_tcp() {
        let (host, port) = parse_mqtt_url("tcp://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_mqtt_url_default_port() {
        let (host, port) = parse_mqtt_url("mqtt://broker.example.com").unwrap();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_mqtt_url_no_scheme() {
        let (host, port) = parse_mqtt_url("localhost:1884").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1884);
    }

    #[test]
    fn parse_mqtt_url_rejects_bad_input() {
        assert!(parse_mqtt_url("ws://localhost:1883").is_err());
        assert!(parse_mqtt_url(":1883").is_err());
        assert!(parse_mqtt_url("localhost:port").is_err());
        assert!(parse_mqtt_url("a:1:2").is_err());
    }

    #[test]
    fn qos_parsing() {
        assert_eq!(parse_qos("0"), Some(QoS::AtMostOnce));
        assert_eq!(parse_qos("AtLeastOnce"), Some(QoS::AtLeastOnce));
        assert_eq!(parse_qos("QoSExactlyOnce"), Some(QoS::ExactlyOnce));
        assert_eq!(parse_qos("3"), None);
    }

    #[test]
    fn client_id_has_prefix_and_suffix() {
        let id = generate_client_id("svc-");
        assert!(id.starts_with("svc-"));
        assert_eq!(id.len(), "svc-".len() + 8);
        assert_ne!(id, generate_client_id("svc-"));
    }

    #[tokio::test]
    async fn tracks_subscriptions_without_broker() {
        let config = MqttConfig {
            broker_url: "tcp://127.0.0.1:1".to_string(),
            reconnect_delay: Duration::from_millis(50),
            ..Default::default()
        };
        let (transport, _rx) = assert_ok!(MqttTransport::connect(&config));

        assert_ok!(transport.subscribe("openchirp/device/d1/rawrx"));
        assert_ok!(transport.subscribe("openchirp/device/d1/rawtx"));
        assert_ok!(transport.unsubscribe(&["openchirp/device/d1/rawrx".to_string()]));
        assert_eq!(transport.subscriptions(), vec!["openchirp/device/d1/rawtx"]);

        assert_ok!(transport.publish("openchirp/device/d1/count", b"1".to_vec()));
        transport.disconnect().await;
        transport.disconnect().await;
    }

    fn topics(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("openchirp/device/d{i}/rawrx"))
            .collect()
    }

    #[tokio::test]
    async fn subscribe_burst_before_first_connection() {
        let config = MqttConfig {
            broker_url: "tcp://127.0.0.1:1".to_string(),
            reconnect_delay: Duration::from_millis(50),
            ..Default::default()
        };
        let (transport, _rx) = assert_ok!(MqttTransport::connect(&config));

        for topic in topics(150) {
            assert_ok!(transport.subscribe(&topic));
        }
        assert_eq!(transport.subscriptions().len(), 150);

        transport.disconnect().await;
        assert!(transport.subscribe("openchirp/device/late/rawrx").is_err());
    }

    #[test]
    fn first_connack_issues_every_tracked_topic() {
        let mut subs = Subscriptions::default();
        for topic in topics(150) {
            subs.subscribe(&topic, |_| -> Result<(), ()> { panic!("sent while offline") });
        }

        let mut issued = Vec::new();
        subs.connected(|batch| -> Result<(), ()> {
            assert!(batch.len() <= RESTORE_BATCH);
            issued.extend_from_slice(batch);
            Ok(())
        });

        issued.sort();
        let mut expected = topics(150);
        expected.sort();
        assert_eq!(issued, expected);
        assert!(subs.pending.is_empty());
    }

    #[test]
    fn full_queue_defers_until_flushed() {
        let mut subs = Subscriptions::default();
        subs.connected(|_| -> Result<(), ()> { Ok(()) });

        subs.subscribe("a", |_| -> Result<(), ()> { Ok(()) });
        subs.subscribe("b", |_| Err(()));
        subs.subscribe("c", |_| Err(()));
        assert_eq!(subs.pending.len(), 2);
        assert_eq!(subs.tracked.len(), 3);

        subs.flush(|_| Err(()));
        assert_eq!(subs.pending.len(), 2);

        let mut flushed = Vec::new();
        subs.flush(|batch| -> Result<(), ()> {
            flushed.extend_from_slice(batch);
            Ok(())
        });
        assert_eq!(flushed, vec!["b", "c"]);
        assert!(subs.pending.is_empty());
    }

    #[test]
    fn failed_restore_batch_is_retried() {
        let mut subs = Subscriptions::default();
        for topic in topics(RESTORE_BATCH + 1) {
            subs.subscribe(&topic, |_| -> Result<(), ()> { Ok(()) });
        }

        let mut calls = 0;
        subs.connected(|_| {
            calls += 1;
            if calls == 1 {
                Err(())
            } else {
                Ok(())
            }
        });
        assert_eq!(subs.pending.len(), RESTORE_BATCH);

        subs.disconnected();
        assert!(subs.pending.is_empty());
        assert_eq!(subs.tracked.len(), RESTORE_BATCH + 1);
    }

    #[test]
    fn partial_unsubscribe_failure_keeps_failed_topic() {
        let mut subs = Subscriptions::default();
        subs.connected(|_| -> Result<(), ()> { Ok(()) });
        for topic in ["a", "b", "c"] {
            subs.subscribe(topic, |_| -> Result<(), ()> { Ok(()) });
        }

        let mut attempted = Vec::new();
        let result = subs.unsubscribe(
            &["a".to_string(), "b".to_string(), "c".to_string()],
            |topic| {
                attempted.push(topic.to_string());
                if topic == "b" {
                    Err("queue full")
                } else {
                    Ok(())
                }
            },
        );

        assert_eq!(attempted, vec!["a", "b", "c"]);
        assert!(matches!(
            result,
            Err(TransportError::Unsubscribe { ref topic, .. }) if topic == "b"
        ));
        assert_eq!(subs.tracked.iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn deferred_topic_unsubscribes_without_request() {
        let mut subs = Subscriptions::default();
        subs.connected(|_| -> Result<(), ()> { Ok(()) });
        subs.subscribe("a", |_| Err(()));

        let result = subs.unsubscribe(&["a".to_string()], |_| -> Result<(), &str> {
            panic!("never subscribed at the broker")
        });

        assert!(result.is_ok());
        assert!(subs.tracked.is_empty());
        assert!(subs.pending.is_empty());
    }
}
