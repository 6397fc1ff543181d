//! Relay that publishes staged analysis events the write path could not send.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::application::events::{EventPublisher, OutboundMessage, PublishError};
use crate::application::repos::{OutboxRepo, RepoError};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Clone)]
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxRepo>,
    publisher: Arc<dyn EventPublisher>,
    batch_size: u32,
}

impl OutboxRelay {
    pub fn new(
        outbox: Arc<dyn OutboxRepo>,
        publisher: Arc<dyn EventPublisher>,
        batch_size: u32,
    ) -> Self {
        Self {
            outbox,
            publisher,
            batch_size: batch_size.max(1),
        }
    }

    /// Publish one batch of pending entries and mark them sent.
    ///
    /// Returns the number of entries published. On a publish failure nothing is
    /// marked and the whole batch is retried on the next call.
    pub async fn relay_once(&self) -> Result<usize, RelayError> {
        let pending = self.outbox.pending(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = pending.iter().map(|entry| entry.id).collect();
        let messages = pending
            .into_iter()
            .map(|entry| OutboundMessage::new(entry.post_id, entry.payload))
            .collect();

        self.publisher.send(None, messages).await?;
        self.outbox.mark_published(&ids).await?;

        debug!(
            target = "poststat::application::jobs::outbox",
            published = ids.len(),
            "outbox batch relayed"
        );
        Ok(ids.len())
    }

    /// Relay until the outbox is empty.
    pub async fn drain(&self) -> Result<usize, RelayError> {
        let mut total = 0;
        loop {
            let published = self.relay_once().await?;
            if published == 0 {
                break;
            }
            total += published;
        }
        info!(
            target = "poststat::application::jobs::outbox",
            published = total,
            "outbox drained"
        );
        Ok(total)
    }
}
