use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{PostStatsRepo, RepoError};
use crate::domain::entities::PostStatRecord;

use super::PostgresRepositories;
use super::lease::within;

#[derive(sqlx::FromRow)]
struct PostStatRow {
    post_id: String,
    word_count: i32,
    avg_word_length: f64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<PostStatRow> for PostStatRecord {
    fn from(row: PostStatRow) -> Self {
        Self {
            post_id: row.post_id,
            word_count: row.word_count,
            avg_word_length: row.avg_word_length,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl PostStatsRepo for PostgresRepositories {
    async fn insert_stat(&self, stat: &PostStatRecord) -> Result<(), RepoError> {
        let mut lease = self.lease("insert_stat").await?;
        let deadline = lease.deadline();
        within(
            deadline,
            "insert_stat",
            sqlx::query(
                r#"
                INSERT INTO post_stat (post_id, word_count, avg_word_length, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&stat.post_id)
            .bind(stat.word_count)
            .bind(stat.avg_word_length)
            .bind(stat.created_at)
            .bind(stat.updated_at)
            .execute(&mut *lease),
        )
        .await?;

        Ok(())
    }

    async fn latest_stat(&self, post_id: &str) -> Result<Option<PostStatRecord>, RepoError> {
        let mut lease = self.lease("latest_stat").await?;
        let deadline = lease.deadline();
        let row = within(
            deadline,
            "latest_stat",
            sqlx::query_as::<_, PostStatRow>(
                r#"
                SELECT post_id, word_count, avg_word_length, created_at, updated_at
                  FROM post_stat
                 WHERE post_id = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1
                "#,
            )
            .bind(post_id)
            .fetch_optional(&mut *lease),
        )
        .await?;

        Ok(row.map(PostStatRecord::from))
    }
}
