//! The pubsub surface the runtime needs from a transport.
//!
//! Outbound operations are non-blocking requests: they hand the work to
//! the transport and return. Inbound publishes are not delivered through
//! callbacks; the transport forwards them as [`Incoming`] values on a
//! channel so the consumer decides where they are serialized.

/// A publish received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    /// Full topic the message arrived on
    pub topic: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl Incoming {
    /// Create an inbound message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound pubsub operations.
pub trait PubSub: Send + Sync {
    /// Start receiving publishes matching `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the request could not be queued.
    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Stop receiving publishes for each of `topics`.
    ///
    /// # Errors
    ///
    /// Returns error if the request could not be queued.
    fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    /// Publish `payload` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the request could not be queued.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Errors reported by a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Subscription request failed
    #[error("subscribe error on {topic}: {message}")]
    Subscribe {
        /// Topic filter
        topic: String,
        /// Underlying error
        message: String,
    },
    /// Unsubscribe request failed
    #[error("unsubscribe error on {topic}: {message}")]
    Unsubscribe {
        /// Topic filter
        topic: String,
        /// Underlying error
        message: String,
    },
    /// Publish request failed
    #[error("publish error on {topic}: {message}")]
    Publish {
        /// Topic
        topic: String,
        /// Underlying error
        message: String,
    },
    /// The transport is shut down
    #[error("transport closed")]
    Closed,
}
