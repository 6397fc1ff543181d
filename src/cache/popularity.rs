//! Read-through stat cache with counter-driven TTL promotion.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::repos::{PostStatsRepo, RepoError};
use crate::domain::entities::PostStatRecord;

use super::config::CachePolicy;
use super::keys::{access_count_key, stat_key};
use super::store::{CacheError, CacheStore};

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Post Stat not found")]
    NotFound,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct PopularityCache {
    store: Arc<dyn CacheStore>,
    stats: Arc<dyn PostStatsRepo>,
    policy: CachePolicy,
}

impl PopularityCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        stats: Arc<dyn PostStatsRepo>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            store,
            stats,
            policy,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Cached stat for `post_id`, falling back to [`Self::refresh`] on a miss.
    ///
    /// Every hit bumps the access counter. The counter inherits the entry's
    /// remaining lifetime when it is created, and the hit that brings it to the
    /// popularity threshold extends both keys to the extended TTL.
    pub async fn get_stat(&self, post_id: &str) -> Result<PostStatRecord, StatsError> {
        let Some(stat) = self.cached(post_id).await else {
            counter!("poststat_cache_miss_total").increment(1);
            return self.refresh(post_id).await;
        };
        counter!("poststat_cache_hit_total").increment(1);

        if let Err(err) = self.record_access(post_id).await {
            warn!(
                target = "poststat::cache::popularity",
                post_id,
                error = %err,
                "failed to record cache access"
            );
        }

        Ok(stat)
    }

    /// Load the latest stat from the store and cache it with the standard TTL.
    pub async fn refresh(&self, post_id: &str) -> Result<PostStatRecord, StatsError> {
        let stat = self
            .stats
            .latest_stat(post_id)
            .await?
            .ok_or(StatsError::NotFound)?;

        if let Err(err) = self.set_cache(&stat).await {
            warn!(
                target = "poststat::cache::popularity",
                post_id,
                error = %err,
                "failed to populate stat cache"
            );
        }

        Ok(stat)
    }

    pub async fn set_cache(&self, stat: &PostStatRecord) -> Result<(), CacheError> {
        let encoded = serde_json::to_string(stat)?;
        self.store
            .set_ex(&stat_key(&stat.post_id), &encoded, self.policy.standard_ttl)
            .await
    }

    /// Write the stat in a detached task; failures are only logged.
    pub fn warm(&self, stat: PostStatRecord) {
        let cache = self.clone();
        tokio::spawn(async move {
            match cache.set_cache(&stat).await {
                Ok(()) => debug!(
                    target = "poststat::cache::popularity",
                    post_id = %stat.post_id,
                    "stat cache warmed"
                ),
                Err(err) => warn!(
                    target = "poststat::cache::popularity",
                    post_id = %stat.post_id,
                    error = %err,
                    "failed to warm stat cache"
                ),
            }
        });
    }

    /// Undecodable entries and backend errors count as a miss.
    async fn cached(&self, post_id: &str) -> Option<PostStatRecord> {
        let raw = match self.store.get(&stat_key(post_id)).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(
                    target = "poststat::cache::popularity",
                    post_id,
                    error = %err,
                    "stat cache read failed; falling back to store"
                );
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(stat) => Some(stat),
            Err(err) => {
                warn!(
                    target = "poststat::cache::popularity",
                    post_id,
                    error = %err,
                    "discarding undecodable cached stat"
                );
                None
            }
        }
    }

    async fn record_access(&self, post_id: &str) -> Result<(), CacheError> {
        let entry_key = stat_key(post_id);
        let counter_key = access_count_key(post_id);
        let count = self.store.incr(&counter_key).await?;

        if count == 1 {
            let ttl = self
                .store
                .ttl(&entry_key)
                .await?
                .unwrap_or(self.policy.standard_ttl);
            self.store.expire(&counter_key, ttl).await?;
        }

        if count == self.policy.popularity_threshold {
            self.store
                .expire(&entry_key, self.policy.extended_ttl)
                .await?;
            self.store
                .expire(&counter_key, self.policy.extended_ttl)
                .await?;
            counter!("poststat_cache_promotion_total").increment(1);
            info!(
                target = "poststat::cache::popularity",
                post_id,
                count,
                ttl_secs = self.policy.extended_ttl.as_secs(),
                "stat promoted to extended ttl"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use time::macros::datetime;
    use tokio::sync::Mutex;

    use super::*;
    use crate::cache::store::MemoryCacheStore;

    #[derive(Default)]
    struct StatsFixture {
        rows: Mutex<HashMap<String, PostStatRecord>>,
        reads: Mutex<usize>,
    }

    #[async_trait]
    impl PostStatsRepo for StatsFixture {
        async fn insert_stat(&self, stat: &PostStatRecord) -> Result<(), RepoError> {
            self.rows
                .lock()
                .await
                .insert(stat.post_id.clone(), stat.clone());
            Ok(())
        }

        async fn latest_stat(&self, post_id: &str) -> Result<Option<PostStatRecord>, RepoError> {
            *self.reads.lock().await += 1;
            Ok(self.rows.lock().await.get(post_id).cloned())
        }
    }

    fn stat(post_id: &str) -> PostStatRecord {
        PostStatRecord {
            post_id: post_id.to_string(),
            word_count: 3,
            avg_word_length: 13.0 / 3.0,
            created_at: datetime!(2025-03-01 10:00 UTC),
            updated_at: datetime!(2025-03-01 10:00 UTC),
        }
    }

    async fn fixture() -> (PopularityCache, Arc<MemoryCacheStore>, Arc<StatsFixture>) {
        let store = Arc::new(MemoryCacheStore::new(
            NonZeroUsize::new(64).expect("non-zero"),
        ));
        let stats = Arc::new(StatsFixture::default());
        stats.insert_stat(&stat("p1")).await.expect("seed");
        let cache = PopularityCache::new(store.clone(), stats.clone(), CachePolicy::default());
        (cache, store, stats)
    }

    async fn ttl(store: &MemoryCacheStore, key: &str) -> Option<u64> {
        store.ttl(key).await.expect("ttl").map(|d| d.as_secs())
    }

    #[tokio::test(start_paused = true)]
    async fn miss_loads_from_store_and_caches_with_standard_ttl() {
        let (cache, store, stats) = fixture().await;

        let loaded = cache.get_stat("p1").await.expect("stat");
        assert_eq!(loaded, stat("p1"));
        assert_eq!(*stats.reads.lock().await, 1);
        assert_eq!(ttl(&store, "post_stat:p1").await, Some(3600));
        assert_eq!(store.get("access_count:p1").await.expect("get"), None);

        cache.get_stat("p1").await.expect("stat");
        assert_eq!(*stats.reads.lock().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn promotion_happens_exactly_at_threshold() {
        let (cache, store, _) = fixture().await;
        cache.refresh("p1").await.expect("refresh");

        for _ in 0..4 {
            cache.get_stat("p1").await.expect("stat");
        }
        assert_eq!(
            store.get("access_count:p1").await.expect("get").as_deref(),
            Some("4")
        );
        assert_eq!(ttl(&store, "post_stat:p1").await, Some(3600));
        assert_eq!(ttl(&store, "access_count:p1").await, Some(3600));

        cache.get_stat("p1").await.expect("stat");
        assert_eq!(ttl(&store, "post_stat:p1").await, Some(86_400));
        assert_eq!(ttl(&store, "access_count:p1").await, Some(86_400));

        tokio::time::advance(Duration::from_secs(10)).await;
        cache.get_stat("p1").await.expect("stat");
        assert_eq!(
            store.get("access_count:p1").await.expect("get").as_deref(),
            Some("6")
        );
        assert_eq!(ttl(&store, "post_stat:p1").await, Some(86_390));
        assert_eq!(ttl(&store, "access_count:p1").await, Some(86_390));
    }

    #[tokio::test(start_paused = true)]
    async fn counter_inherits_remaining_entry_lifetime() {
        let (cache, store, _) = fixture().await;
        cache.refresh("p1").await.expect("refresh");

        tokio::time::advance(Duration::from_secs(600)).await;
        cache.get_stat("p1").await.expect("stat");
        assert_eq!(ttl(&store, "access_count:p1").await, Some(3000));
    }

    #[tokio::test]
    async fn refresh_of_unknown_post_is_not_found() {
        let (cache, _, _) = fixture().await;
        assert!(matches!(
            cache.refresh("missing").await,
            Err(StatsError::NotFound)
        ));
        assert!(matches!(
            cache.get_stat("missing").await,
            Err(StatsError::NotFound)
        ));
    }

    #[tokio::test]
    async fn undecodable_entry_is_treated_as_miss() {
        let (cache, store, stats) = fixture().await;
        store
            .set_ex("post_stat:p1", "not json", Duration::from_secs(60))
            .await
            .expect("set");

        let loaded = cache.get_stat("p1").await.expect("stat");
        assert_eq!(loaded.post_id, "p1");
        assert_eq!(*stats.reads.lock().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_cache_overwrites_with_standard_ttl() {
        let (cache, store, _) = fixture().await;
        let mut fresh = stat("p2");
        fresh.word_count = 7;

        cache.set_cache(&fresh).await.expect("set");
        assert_eq!(ttl(&store, "post_stat:p2").await, Some(3600));

        let cached = cache.get_stat("p2").await.expect("stat");
        assert_eq!(cached.word_count, 7);
    }
}
