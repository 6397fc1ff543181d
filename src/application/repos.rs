//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{OutboxRecord, PostRecord, PostStatRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    async fn find_post(&self, id: &str) -> Result<Option<PostRecord>, RepoError>;
}

#[async_trait]
pub trait PostsWriteRepo: Send + Sync {
    /// Insert the post and stage its analysis event in the same transaction.
    /// Returns the id of the staged outbox entry.
    async fn create_post(&self, post: &PostRecord, event_payload: &str) -> Result<i64, RepoError>;
}

#[async_trait]
pub trait PostStatsRepo: Send + Sync {
    async fn insert_stat(&self, stat: &PostStatRecord) -> Result<(), RepoError>;

    /// Most recently created stat row for the post.
    async fn latest_stat(&self, post_id: &str) -> Result<Option<PostStatRecord>, RepoError>;
}

#[async_trait]
pub trait OutboxRepo: Send + Sync {
    /// Unpublished entries, oldest first.
    async fn pending(&self, limit: u32) -> Result<Vec<OutboxRecord>, RepoError>;

    async fn mark_published(&self, ids: &[i64]) -> Result<(), RepoError>;
}

#[async_trait]
pub trait HealthRepo: Send + Sync {
    async fn ping(&self) -> Result<(), RepoError>;
}
