//! Seams between the application services and the message broker.

use async_trait::async_trait;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Keyed record handed to the broker; the key selects the partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub key: String,
    pub value: String,
}

impl OutboundMessage {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no topic given and no default topic configured")]
    TopicUndefined,
    #[error("failed to deliver message `{key}`: {message}")]
    Transport { key: String, message: String },
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Send all `messages` as one batch to `topic`, or to the default topic when `None`.
    async fn send(
        &self,
        topic: Option<&str>,
        messages: Vec<OutboundMessage>,
    ) -> Result<(), PublishError>;
}

/// Consumer-side callback invoked with the UTF-8 value of each delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &str) -> Result<(), BoxError>;
}
