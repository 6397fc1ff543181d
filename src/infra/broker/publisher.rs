use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{error, info, warn};

use crate::application::events::{
    ConnectionState, EventPublisher, OutboundMessage, PublishError,
};
use crate::config::BrokerSettings;

use super::BrokerError;

/// Producer sending keyed, gzip-compressed batches with idempotent delivery.
pub struct KafkaPublisher {
    producer: FutureProducer,
    default_topic: Option<String>,
    connection_timeout: Duration,
    request_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(settings: &BrokerSettings) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.host)
            .set("client.id", &settings.client_id)
            .set("compression.type", "gzip")
            .set("enable.idempotence", "true")
            .set(
                "socket.connection.setup.timeout.ms",
                millis(settings.connection_timeout),
            )
            .set("request.timeout.ms", millis(settings.request_timeout))
            .set("message.timeout.ms", millis(settings.request_timeout))
            .create()?;

        Ok(Self {
            producer,
            default_topic: settings.topic.clone(),
            connection_timeout: settings.connection_timeout,
            request_timeout: settings.request_timeout,
        })
    }

    pub fn default_topic(&self) -> Option<&str> {
        self.default_topic.as_deref()
    }

    /// Fetch cluster metadata to confirm the brokers are reachable.
    pub async fn start(&self) -> Result<ConnectionState, BrokerError> {
        let producer = self.producer.clone();
        let topic = self.default_topic.clone();
        let timeout = self.connection_timeout;

        let brokers = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(topic.as_deref(), timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|err| BrokerError::Task(err.to_string()))??;

        info!(
            target = "poststat::infra::broker::publisher",
            brokers,
            state = ConnectionState::Connected.as_str(),
            "producer connected"
        );
        Ok(ConnectionState::Connected)
    }

    /// Flush queued deliveries. Failures are logged; the producer is considered gone either way.
    pub async fn shutdown(&self) -> ConnectionState {
        let producer = self.producer.clone();
        let timeout = self.request_timeout;

        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout)).await;
        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                target = "poststat::infra::broker::publisher",
                error = %err,
                "producer flush failed during shutdown"
            ),
            Err(err) => warn!(
                target = "poststat::infra::broker::publisher",
                error = %err,
                "producer flush task failed"
            ),
        }

        info!(
            target = "poststat::infra::broker::publisher",
            state = ConnectionState::Disconnected.as_str(),
            "producer disconnected"
        );
        ConnectionState::Disconnected
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn send(
        &self,
        topic: Option<&str>,
        messages: Vec<OutboundMessage>,
    ) -> Result<(), PublishError> {
        let topic = resolve_topic(topic, self.default_topic.as_deref())?;

        let deliveries = messages.iter().map(|message| {
            let record = FutureRecord::to(topic)
                .key(message.key.as_str())
                .payload(message.value.as_str());
            self.producer
                .send(record, Timeout::After(self.request_timeout))
        });
        let results = join_all(deliveries).await;

        for (message, result) in messages.iter().zip(results) {
            if let Err((err, _)) = result {
                error!(
                    target = "poststat::infra::broker::publisher",
                    topic,
                    key = %message.key,
                    error = %err,
                    "failed to deliver message"
                );
                return Err(PublishError::Transport {
                    key: message.key.clone(),
                    message: err.to_string(),
                });
            }
        }

        Ok(())
    }
}

fn resolve_topic<'a>(
    explicit: Option<&'a str>,
    default: Option<&'a str>,
) -> Result<&'a str, PublishError> {
    explicit
        .or(default)
        .filter(|topic| !topic.is_empty())
        .ok_or(PublishError::TopicUndefined)
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}
