#![allow(dead_code)]

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use poststat::application::events::{EventPublisher, OutboundMessage, PublishError};
use poststat::application::jobs::{AnalysisProcessor, OutboxRelay};
use poststat::application::posts::PostService;
use poststat::application::repos::{
    HealthRepo, OutboxRepo, PostStatsRepo, PostsRepo, PostsWriteRepo, RepoError,
};
use poststat::cache::{CachePolicy, MemoryCacheStore, PopularityCache};
use poststat::domain::entities::{OutboxRecord, PostRecord, PostStatRecord};
use poststat::infra::http::{ApiRateLimiter, ApiState};

/// Post table plus outbox, committed together like the relational adapter does.
#[derive(Default)]
pub struct InMemoryPosts {
    posts: Mutex<HashMap<String, PostRecord>>,
    outbox: Mutex<Vec<OutboxRecord>>,
    next_outbox_id: AtomicI64,
    pub fail_writes: AtomicBool,
    pub fail_ping: AtomicBool,
}

impl InMemoryPosts {
    pub async fn post_count(&self) -> usize {
        self.posts.lock().await.len()
    }

    pub async fn outbox_entries(&self) -> Vec<OutboxRecord> {
        self.outbox.lock().await.clone()
    }
}

#[async_trait]
impl PostsRepo for InMemoryPosts {
    async fn find_post(&self, id: &str) -> Result<Option<PostRecord>, RepoError> {
        Ok(self.posts.lock().await.get(id).cloned())
    }
}

#[async_trait]
impl PostsWriteRepo for InMemoryPosts {
    async fn create_post(&self, post: &PostRecord, event_payload: &str) -> Result<i64, RepoError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("connection reset by peer"));
        }

        let mut posts = self.posts.lock().await;
        if posts.contains_key(&post.id) {
            return Err(RepoError::Duplicate {
                constraint: "post_pkey".to_string(),
            });
        }
        posts.insert(post.id.clone(), post.clone());

        let id = self.next_outbox_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.outbox.lock().await.push(OutboxRecord {
            id,
            post_id: post.id.clone(),
            payload: event_payload.to_string(),
            created_at: OffsetDateTime::now_utc(),
            published_at: None,
        });
        Ok(id)
    }
}

#[async_trait]
impl OutboxRepo for InMemoryPosts {
    async fn pending(&self, limit: u32) -> Result<Vec<OutboxRecord>, RepoError> {
        Ok(self
            .outbox
            .lock()
            .await
            .iter()
            .filter(|entry| entry.published_at.is_none())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, ids: &[i64]) -> Result<(), RepoError> {
        let now = OffsetDateTime::now_utc();
        for entry in self.outbox.lock().await.iter_mut() {
            if ids.contains(&entry.id) && entry.published_at.is_none() {
                entry.published_at = Some(now);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HealthRepo for InMemoryPosts {
    async fn ping(&self) -> Result<(), RepoError> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        Ok(())
    }
}

/// Append-only stat rows; the latest row per post wins on read.
#[derive(Default)]
pub struct InMemoryStats {
    rows: Mutex<Vec<PostStatRecord>>,
}

impl InMemoryStats {
    pub async fn rows_for(&self, post_id: &str) -> Vec<PostStatRecord> {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|row| row.post_id == post_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PostStatsRepo for InMemoryStats {
    async fn insert_stat(&self, stat: &PostStatRecord) -> Result<(), RepoError> {
        self.rows.lock().await.push(stat.clone());
        Ok(())
    }

    async fn latest_stat(&self, post_id: &str) -> Result<Option<PostStatRecord>, RepoError> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .rev()
            .find(|row| row.post_id == post_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<OutboundMessage>>,
    pub fail: AtomicBool,
}

impl RecordingPublisher {
    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn send(
        &self,
        _topic: Option<&str>,
        messages: Vec<OutboundMessage>,
    ) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            let key = messages
                .first()
                .map(|message| message.key.clone())
                .unwrap_or_default();
            return Err(PublishError::Transport {
                key,
                message: "broker unreachable".to_string(),
            });
        }
        self.sent.lock().await.extend(messages);
        Ok(())
    }
}

pub struct Harness {
    pub posts: Arc<InMemoryPosts>,
    pub stats: Arc<InMemoryStats>,
    pub publisher: Arc<RecordingPublisher>,
    pub service: Arc<PostService>,
    pub cache: PopularityCache,
    pub analysis: Arc<AnalysisProcessor>,
    pub relay: OutboxRelay,
}

impl Harness {
    pub fn new() -> Self {
        let posts = Arc::new(InMemoryPosts::default());
        let stats = Arc::new(InMemoryStats::default());
        let publisher = Arc::new(RecordingPublisher::default());

        let store = Arc::new(MemoryCacheStore::new(
            NonZeroUsize::new(128).expect("non-zero capacity"),
        ));
        let cache = PopularityCache::new(store, stats.clone(), CachePolicy::default());

        let service = Arc::new(PostService::new(
            posts.clone(),
            posts.clone(),
            posts.clone(),
            publisher.clone(),
        ));
        let analysis = Arc::new(AnalysisProcessor::new(stats.clone(), cache.clone()));
        let relay = OutboxRelay::new(posts.clone(), publisher.clone(), 10);

        Self {
            posts,
            stats,
            publisher,
            service,
            cache,
            analysis,
            relay,
        }
    }

    pub fn api_state(&self, max_requests: u32) -> ApiState {
        ApiState {
            posts: self.service.clone(),
            stats: self.cache.clone(),
            health: self.posts.clone(),
            rate_limiter: Arc::new(ApiRateLimiter::new(
                Duration::from_secs(900),
                max_requests,
            )),
        }
    }
}
