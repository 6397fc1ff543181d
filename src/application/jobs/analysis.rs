//! Consumer-side analysis of published posts.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::application::events::{BoxError, MessageHandler};
use crate::application::repos::{PostStatsRepo, RepoError};
use crate::cache::PopularityCache;
use crate::domain::entities::PostStatRecord;
use crate::domain::words::WordStats;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Post not found")]
    NotFound,
    #[error("word count {0} exceeds storable range")]
    Overflow(usize),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Stat row for `body`, stamped with the current time.
pub fn stat_for_body(post_id: &str, body: &str) -> Result<PostStatRecord, AnalysisError> {
    let stats = WordStats::of_body(body);
    let word_count =
        i32::try_from(stats.word_count).map_err(|_| AnalysisError::Overflow(stats.word_count))?;
    let now = OffsetDateTime::now_utc();
    Ok(PostStatRecord {
        post_id: post_id.to_string(),
        word_count,
        avg_word_length: stats.avg_word_length,
        created_at: now,
        updated_at: now,
    })
}

#[derive(Clone)]
pub struct AnalysisProcessor {
    stats: Arc<dyn PostStatsRepo>,
    cache: PopularityCache,
}

impl AnalysisProcessor {
    pub fn new(stats: Arc<dyn PostStatsRepo>, cache: PopularityCache) -> Self {
        Self { stats, cache }
    }

    /// Compute and store the stat for one analysis event, then warm the cache.
    ///
    /// Every call inserts a new row, so a redelivered event leaves a duplicate.
    pub async fn process_post(&self, event_value: &str) -> Result<PostStatRecord, AnalysisError> {
        let started = Instant::now();
        let (post_id, body) = parse_event(event_value).ok_or(AnalysisError::NotFound)?;

        let stat = stat_for_body(&post_id, &body)?;
        self.stats.insert_stat(&stat).await?;
        self.cache.warm(stat.clone());

        histogram!("poststat_analysis_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        counter!("poststat_analysis_processed_total").increment(1);
        info!(
            target = "poststat::application::jobs::analysis",
            post_id = %stat.post_id,
            word_count = stat.word_count,
            avg_word_length = stat.avg_word_length,
            "post analysed"
        );

        Ok(stat)
    }
}

fn parse_event(event_value: &str) -> Option<(String, String)> {
    let value: Value = match serde_json::from_str(event_value) {
        Ok(value) => value,
        Err(err) => {
            debug!(
                target = "poststat::application::jobs::analysis",
                error = %err,
                "analysis event is not valid JSON"
            );
            return None;
        }
    };
    let object = value.as_object()?;
    let body = object.get("body")?.as_str()?;
    let id = object.get("id")?.as_str()?;
    Some((id.to_string(), body.to_string()))
}

#[async_trait]
impl MessageHandler for AnalysisProcessor {
    async fn handle(&self, payload: &str) -> Result<(), BoxError> {
        match self.process_post(payload).await {
            Ok(_) => Ok(()),
            Err(err) => {
                counter!("poststat_analysis_failed_total").increment(1);
                Err(Box::new(err))
            }
        }
    }
}
