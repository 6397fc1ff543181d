//! Transport-independent consumption loops.
//!
//! [`process_batch`] walks one partition's batch and stops at the first message
//! it cannot finish. Before each message it consults the liveness predicates;
//! after the handler returns it marks the message's offset and sends a
//! heartbeat. Messages after the stop point are neither processed nor marked,
//! so they are delivered again on the next fetch or assignment.
//!
//! [`process_messages`] is the per-message variant: no liveness checks, but a
//! message that fails still blocks the rest of its partition so the commit
//! point never moves past it.

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::application::events::MessageHandler;

use super::{BrokerError, InboundMessage};

#[async_trait]
pub trait BatchControl: Send + Sync {
    fn is_running(&self) -> bool;

    /// The batch was superseded, e.g. its partition was revoked by a rebalance.
    fn is_stale(&self) -> bool;

    /// Make `message` the new commit point for its partition.
    fn resolve_offset(&self, message: &InboundMessage) -> Result<(), BrokerError>;

    async fn heartbeat(&self) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    NotRunning,
    Stale,
    HandlerFailed,
    ResolveFailed,
    HeartbeatFailed,
}

impl StopReason {
    /// Whether the partition should be rewound to the first unmarked message.
    pub fn needs_rewind(&self) -> bool {
        matches!(
            self,
            StopReason::HandlerFailed | StopReason::ResolveFailed | StopReason::HeartbeatFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::NotRunning => "not_running",
            StopReason::Stale => "stale",
            StopReason::HandlerFailed => "handler_failed",
            StopReason::ResolveFailed => "resolve_failed",
            StopReason::HeartbeatFailed => "heartbeat_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStop {
    pub reason: StopReason,
    /// Offset of the first message that was not marked, if any remain.
    pub resume_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    pub marked: usize,
    pub stop: Option<BatchStop>,
}

pub async fn process_batch(
    handler: &dyn MessageHandler,
    control: &dyn BatchControl,
    batch: &[InboundMessage],
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for (index, message) in batch.iter().enumerate() {
        let stop = |reason| BatchStop {
            reason,
            resume_at: Some(message.offset),
        };

        if !control.is_running() {
            outcome.stop = Some(stop(StopReason::NotRunning));
            break;
        }
        if control.is_stale() {
            outcome.stop = Some(stop(StopReason::Stale));
            break;
        }

        if let Err(err) = handler.handle(&message.payload_text()).await {
            error!(
                target = "poststat::infra::broker::batch",
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %err,
                "message handler failed; batch stopped"
            );
            outcome.stop = Some(stop(StopReason::HandlerFailed));
            break;
        }

        if let Err(err) = control.resolve_offset(message) {
            error!(
                target = "poststat::infra::broker::batch",
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %err,
                "failed to mark offset; batch stopped"
            );
            outcome.stop = Some(stop(StopReason::ResolveFailed));
            break;
        }
        outcome.marked += 1;

        if let Err(err) = control.heartbeat().await {
            warn!(
                target = "poststat::infra::broker::batch",
                partition = message.partition,
                error = %err,
                "heartbeat failed; batch stopped"
            );
            outcome.stop = Some(BatchStop {
                reason: StopReason::HeartbeatFailed,
                resume_at: batch.get(index + 1).map(|next| next.offset),
            });
            break;
        }
    }

    debug!(
        target = "poststat::infra::broker::batch",
        size = batch.len(),
        marked = outcome.marked,
        stop = outcome.stop.map(|stop| stop.reason.as_str()).unwrap_or("completed"),
        "batch finished"
    );
    outcome
}

/// Per-message mode: run the handler and mark the offset only on success.
///
/// A failure is logged and the message stays unmarked; there is no retry here.
pub async fn process_message(
    handler: &dyn MessageHandler,
    control: &dyn BatchControl,
    message: &InboundMessage,
) -> Result<(), StopReason> {
    if let Err(err) = handler.handle(&message.payload_text()).await {
        error!(
            target = "poststat::infra::broker::message",
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            error = %err,
            "message handler failed"
        );
        return Err(StopReason::HandlerFailed);
    }

    control.resolve_offset(message).map_err(|err| {
        error!(
            target = "poststat::infra::broker::message",
            partition = message.partition,
            offset = message.offset,
            error = %err,
            "failed to mark offset"
        );
        StopReason::ResolveFailed
    })
}

/// Run one partition's messages one at a time, stopping at the first failure.
///
/// Later messages of the partition are left for the rewound fetch; marking them
/// would commit past the failed offset.
pub async fn process_messages(
    handler: &dyn MessageHandler,
    control: &dyn BatchControl,
    messages: &[InboundMessage],
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for message in messages {
        if let Err(reason) = process_message(handler, control, message).await {
            outcome.stop = Some(BatchStop {
                reason,
                resume_at: Some(message.offset),
            });
            break;
        }
        outcome.marked += 1;
    }
    outcome
}

/// Split a fetched run of messages into per-partition batches, keeping arrival order.
pub fn group_by_partition(messages: Vec<InboundMessage>) -> Vec<Vec<InboundMessage>> {
    let mut batches: Vec<Vec<InboundMessage>> = Vec::new();
    for message in messages {
        let existing = batches.iter_mut().find(|batch| {
            batch
                .first()
                .is_some_and(|head| head.topic == message.topic && head.partition == message.partition)
        });
        match existing {
            Some(batch) => batch.push(message),
            None => batches.push(vec![message]),
        }
    }
    batches
}
