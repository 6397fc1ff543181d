use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::topic_partition_list::Offset;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::application::events::{ConnectionState, MessageHandler};
use crate::config::{BrokerSettings, ConsumerMode};

use super::{
    BatchControl, BrokerError, InboundMessage, group_by_partition, process_batch,
    process_messages,
};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
const RECV_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Group member consuming the analysis topic.
///
/// Auto-commit stays on but offsets are stored manually, so only messages the
/// handler finished are ever committed.
pub struct KafkaSubscriber {
    consumer: StreamConsumer,
    topic: String,
    mode: ConsumerMode,
    batch_max: usize,
    batch_wait: Duration,
    running: AtomicBool,
    shutdown: Notify,
}

impl KafkaSubscriber {
    pub fn new(settings: &BrokerSettings) -> Result<Self, BrokerError> {
        let topic = settings
            .topic
            .clone()
            .filter(|topic| !topic.is_empty())
            .ok_or_else(|| BrokerError::Task("consumer requires a topic".to_string()))?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.host)
            .set("client.id", &settings.client_id)
            .set("group.id", &settings.consumer_group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.offset.reset",
                if settings.from_beginning {
                    "earliest"
                } else {
                    "latest"
                },
            )
            .set(
                "socket.connection.setup.timeout.ms",
                settings.connection_timeout.as_millis().to_string(),
            )
            .set(
                "socket.timeout.ms",
                settings.request_timeout.as_millis().to_string(),
            )
            .create()?;

        Ok(Self {
            consumer,
            topic,
            mode: settings.consumer_mode,
            batch_max: settings.batch_max_messages.get() as usize,
            batch_wait: settings.batch_wait,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Subscribe and dispatch deliveries to `handler` until [`Self::shutdown`] is called.
    pub async fn run(&self, handler: Arc<dyn MessageHandler>) -> Result<(), BrokerError> {
        self.consumer.subscribe(&[self.topic.as_str()])?;
        self.running.store(true, Ordering::SeqCst);
        info!(
            target = "poststat::infra::broker::subscriber",
            topic = %self.topic,
            mode = self.mode.as_str(),
            state = ConnectionState::Connected.as_str(),
            "consumer subscribed"
        );

        while self.running.load(Ordering::SeqCst) {
            let fetched = self.next_batch().await?;
            if fetched.is_empty() {
                continue;
            }

            for batch in group_by_partition(fetched) {
                let Some(head) = batch.first() else {
                    continue;
                };
                let control = self.control(head);
                let outcome = match self.mode {
                    ConsumerMode::Message => {
                        process_messages(handler.as_ref(), &control, &batch).await
                    }
                    ConsumerMode::Batch => process_batch(handler.as_ref(), &control, &batch).await,
                };
                if let Some(stop) = outcome.stop
                    && stop.reason.needs_rewind()
                    && let Some(offset) = stop.resume_at
                {
                    self.rewind(head, offset);
                }
            }
        }

        Ok(())
    }

    /// Stop the run loop and leave the group.
    pub fn shutdown(&self) -> ConnectionState {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
        self.consumer.unsubscribe();
        info!(
            target = "poststat::infra::broker::subscriber",
            state = ConnectionState::Disconnected.as_str(),
            "consumer disconnected"
        );
        ConnectionState::Disconnected
    }

    fn control<'a>(&'a self, message: &InboundMessage) -> PartitionControl<'a> {
        PartitionControl {
            consumer: &self.consumer,
            running: &self.running,
            topic: message.topic.clone(),
            partition: message.partition,
        }
    }

    /// Collect up to `batch_max` messages, waiting at most `batch_wait` after the first.
    ///
    /// Receive errors the client recovers from yield a short or empty batch; only a
    /// fatal client state ends the run.
    async fn next_batch(&self) -> Result<Vec<InboundMessage>, BrokerError> {
        let first = tokio::select! {
            _ = self.shutdown.notified() => return Ok(Vec::new()),
            received = self.consumer.recv() => match received {
                Ok(message) => InboundMessage::from_message(&message),
                Err(err) => {
                    self.recover(err)?;
                    tokio::select! {
                        _ = self.shutdown.notified() => {}
                        _ = tokio::time::sleep(RECV_RETRY_DELAY) => {}
                    }
                    return Ok(Vec::new());
                }
            },
        };

        let mut batch = vec![first];
        let deadline = Instant::now() + self.batch_wait;
        while batch.len() < self.batch_max {
            match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Ok(Ok(message)) => batch.push(InboundMessage::from_message(&message)),
                Ok(Err(err)) => {
                    self.recover(err)?;
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    fn recover(&self, err: KafkaError) -> Result<(), BrokerError> {
        let fatal = self.consumer.client().fatal_error().map(|(_, reason)| reason);
        recv_failure(err, fatal)
    }

    /// Move the fetch position back so unmarked messages are delivered again.
    fn rewind(&self, message: &InboundMessage, offset: i64) {
        match self.consumer.seek(
            &message.topic,
            message.partition,
            Offset::Offset(offset),
            SEEK_TIMEOUT,
        ) {
            Ok(()) => warn!(
                target = "poststat::infra::broker::subscriber",
                partition = message.partition,
                offset,
                "rewound partition to first unmarked message"
            ),
            Err(err) => error!(
                target = "poststat::infra::broker::subscriber",
                partition = message.partition,
                offset,
                error = %err,
                "failed to rewind partition"
            ),
        }
    }
}

struct PartitionControl<'a> {
    consumer: &'a StreamConsumer,
    running: &'a AtomicBool,
    topic: String,
    partition: i32,
}

#[async_trait]
impl BatchControl for PartitionControl<'_> {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_stale(&self) -> bool {
        match self.consumer.assignment() {
            Ok(assignment) => assignment
                .find_partition(&self.topic, self.partition)
                .is_none(),
            Err(_) => true,
        }
    }

    fn resolve_offset(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        self.consumer
            .store_offset(&message.topic, message.partition, message.offset + 1)?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), BrokerError> {
        // Group heartbeats run on the client's own thread; surface a fatal client state instead.
        match self.consumer.client().fatal_error() {
            Some((_, reason)) => Err(BrokerError::Liveness(reason)),
            None => Ok(()),
        }
    }
}

/// Classify a receive error: transient ones are logged and consumption goes on.
fn recv_failure(err: KafkaError, fatal: Option<String>) -> Result<(), BrokerError> {
    if let Some(reason) = fatal {
        return Err(BrokerError::Liveness(reason));
    }
    warn!(
        target = "poststat::infra::broker::subscriber",
        error = %err,
        "consumer receive failed; retrying"
    );
    Ok(())
}
