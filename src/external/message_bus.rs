//! Downstream message bus boundary.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("topic {0} rejected the message")]
    Rejected(String),
}

/// Publish-only interface keyed by topic.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError>;
}

/// A message accepted by the in-memory bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

/// In-memory bus recording every accepted message.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    messages: Mutex<Vec<PublishedMessage>>,
    rejecting: Mutex<HashSet<String>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish to `topic` fail.
    pub fn reject_topic(&self, topic: &str) {
        self.rejecting.lock().insert(topic.to_string());
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().clone()
    }

    pub fn messages_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        if self.rejecting.lock().contains(topic) {
            return Err(BusError::Rejected(topic.to_string()));
        }

        self.messages.lock().push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
            published_at: Utc::now(),
        });
        Ok(())
    }
}
