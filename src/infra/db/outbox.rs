use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{OutboxRepo, RepoError};
use crate::domain::entities::OutboxRecord;

use super::PostgresRepositories;
use super::lease::within;

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    post_id: String,
    payload: String,
    created_at: OffsetDateTime,
    published_at: Option<OffsetDateTime>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            payload: row.payload,
            created_at: row.created_at,
            published_at: row.published_at,
        }
    }
}

#[async_trait]
impl OutboxRepo for PostgresRepositories {
    async fn pending(&self, limit: u32) -> Result<Vec<OutboxRecord>, RepoError> {
        let mut lease = self.lease("outbox_pending").await?;
        let deadline = lease.deadline();
        let rows = within(
            deadline,
            "outbox_pending",
            sqlx::query_as::<_, OutboxRow>(
                r#"
                SELECT id, post_id, payload, created_at, published_at
                  FROM post_outbox
                 WHERE published_at IS NULL
                 ORDER BY id
                 LIMIT $1
                "#,
            )
            .bind(i64::from(limit))
            .fetch_all(&mut *lease),
        )
        .await?;

        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    async fn mark_published(&self, ids: &[i64]) -> Result<(), RepoError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut lease = self.lease("outbox_mark_published").await?;
        let deadline = lease.deadline();
        within(
            deadline,
            "outbox_mark_published",
            sqlx::query(
                r#"
                UPDATE post_outbox
                   SET published_at = now()
                 WHERE id = ANY($1)
                   AND published_at IS NULL
                "#,
            )
            .bind(ids)
            .execute(&mut *lease),
        )
        .await?;

        Ok(())
    }
}
