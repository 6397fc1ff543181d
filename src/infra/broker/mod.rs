//! Kafka transport for analysis events.

mod batch;
mod publisher;
mod subscriber;

pub use batch::{
    BatchControl, BatchOutcome, BatchStop, StopReason, group_by_partition, process_batch,
    process_message, process_messages,
};
pub use publisher::KafkaPublisher;
pub use subscriber::KafkaSubscriber;

use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("kafka client error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("broker task failed: {0}")]
    Task(String),
    #[error("consumer is no longer alive: {0}")]
    Liveness(String),
}

/// Owned copy of a consumed record, detached from the client's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
}

impl InboundMessage {
    pub fn from_message<M: Message>(message: &M) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec),
        }
    }

    /// Value decoded as UTF-8, lossily; an absent value is the empty string.
    pub fn payload_text(&self) -> String {
        self.payload
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }
}
