//! Write path for posts: validate, persist with a staged event, publish.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::events::{BoxError, EventPublisher, OutboundMessage};
use crate::application::repos::{OutboxRepo, PostsRepo, PostsWriteRepo, RepoError};
use crate::domain::entities::PostRecord;
use crate::domain::error::PostValidationError;
use crate::domain::posts::validate_post;

#[derive(Debug, Error)]
pub enum PostError {
    #[error(transparent)]
    Invalid(#[from] PostValidationError),
    #[error("Post already exists")]
    Duplicate,
    #[error("Post not found")]
    NotFound,
    /// Store failures on the write path are reported to clients as a plain bad request.
    #[error("Invalid post")]
    BadRequest(#[source] BoxError),
    #[error("post store unavailable")]
    Unavailable(#[source] RepoError),
}

/// Broker envelope for a post: keyed by post id, the JSON post as value.
pub fn analysis_event(post: &PostRecord) -> Result<OutboundMessage, serde_json::Error> {
    let value = serde_json::to_string(post)?;
    Ok(OutboundMessage::new(post.id.clone(), value))
}

#[derive(Clone)]
pub struct PostService {
    reader: Arc<dyn PostsRepo>,
    writer: Arc<dyn PostsWriteRepo>,
    outbox: Arc<dyn OutboxRepo>,
    publisher: Arc<dyn EventPublisher>,
}

impl PostService {
    pub fn new(
        reader: Arc<dyn PostsRepo>,
        writer: Arc<dyn PostsWriteRepo>,
        outbox: Arc<dyn OutboxRepo>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            reader,
            writer,
            outbox,
            publisher,
        }
    }

    pub async fn create_post(&self, id: &str, body: &str) -> Result<PostRecord, PostError> {
        let post = PostRecord::new_active(id, body);
        validate_post(&post.id, &post.body)?;

        let event = analysis_event(&post).map_err(|err| PostError::BadRequest(Box::new(err)))?;

        let outbox_id = match self.writer.create_post(&post, &event.value).await {
            Ok(outbox_id) => outbox_id,
            Err(RepoError::Duplicate { .. }) => return Err(PostError::Duplicate),
            Err(err) => {
                warn!(
                    target = "poststat::application::posts",
                    post_id = %post.id,
                    error = %err,
                    "failed to persist post"
                );
                return Err(PostError::BadRequest(Box::new(err)));
            }
        };

        counter!("poststat_posts_created_total").increment(1);
        self.publish_staged(outbox_id, event).await;

        Ok(post)
    }

    pub async fn find_post(&self, id: &str) -> Result<PostRecord, PostError> {
        match self.reader.find_post(id).await {
            Ok(Some(post)) => Ok(post),
            Ok(None) => Err(PostError::NotFound),
            Err(err) => Err(PostError::Unavailable(err)),
        }
    }

    /// The entry is already committed, so a failed send is left to the outbox relay.
    async fn publish_staged(&self, outbox_id: i64, event: OutboundMessage) {
        let key = event.key.clone();
        if let Err(err) = self.publisher.send(None, vec![event]).await {
            warn!(
                target = "poststat::application::posts",
                post_id = %key,
                outbox_id,
                error = %err,
                "analysis event not published; left for outbox relay"
            );
            return;
        }

        match self.outbox.mark_published(&[outbox_id]).await {
            Ok(()) => debug!(
                target = "poststat::application::posts",
                post_id = %key,
                outbox_id,
                "analysis event published"
            ),
            Err(err) => warn!(
                target = "poststat::application::posts",
                post_id = %key,
                outbox_id,
                error = %err,
                "failed to mark outbox entry published; relay will send it again"
            ),
        }
    }
}
