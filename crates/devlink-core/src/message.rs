//! Inbound device messages.

use std::fmt;

/// A pubsub message received on one of a device's subscribed subtopics,
/// paired with the key given when the subtopic was subscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<K> {
    key: K,
    subtopic: String,
    payload: Vec<u8>,
}

impl<K> Message<K> {
    /// Create a message.
    #[must_use]
    pub fn new(key: K, subtopic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key,
            subtopic: subtopic.into(),
            payload,
        }
    }

    /// The key supplied when subscribing.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Topic relative to the device's topic prefix.
    #[must_use]
    pub fn subtopic(&self) -> &str {
        &self.subtopic
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the message, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl<K: fmt::Debug> fmt::Display for Message<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}: [", self.key, self.subtopic)?;
        for (i, byte) in self.payload.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:#04x}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let msg = Message::new(7u8, "rawrx", b"hi".to_vec());
        assert_eq!(*msg.key(), 7);
        assert_eq!(msg.subtopic(), "rawrx");
        assert_eq!(msg.payload(), b"hi");
        assert_eq!(msg.into_payload(), b"hi".to_vec());
    }

    #[test]
    fn display_shows_hex_payload() {
        let msg = Message::new("rx", "rawrx", vec![0x01, 0xab]);
        assert_eq!(msg.to_string(), "\"rx\": rawrx: [0x01 0xab]");
    }
}
