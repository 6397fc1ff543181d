use async_trait::async_trait;
use sqlx::Connection;
use time::OffsetDateTime;

use crate::application::repos::{PostsRepo, PostsWriteRepo, RepoError};
use crate::domain::entities::PostRecord;
use crate::domain::types::PostStatus;

use super::PostgresRepositories;
use super::lease::within;

#[derive(sqlx::FromRow)]
struct PostRow {
    id: String,
    body: String,
    status: PostStatus,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            body: row.body,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn find_post(&self, id: &str) -> Result<Option<PostRecord>, RepoError> {
        let mut lease = self.lease("find_post").await?;
        let deadline = lease.deadline();
        let row = within(
            deadline,
            "find_post",
            sqlx::query_as::<_, PostRow>(
                r#"
                SELECT id, body, status, created_at, updated_at
                  FROM post
                 WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&mut *lease),
        )
        .await?;

        Ok(row.map(PostRecord::from))
    }
}

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn create_post(&self, post: &PostRecord, event_payload: &str) -> Result<i64, RepoError> {
        let mut lease = self.lease("create_post").await?;
        let deadline = lease.deadline();
        within(deadline, "create_post", async {
            let mut tx = lease.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO post (id, body, status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&post.id)
            .bind(&post.body)
            .bind(post.status)
            .bind(post.created_at)
            .bind(post.updated_at)
            .execute(&mut *tx)
            .await?;

            let (outbox_id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO post_outbox (post_id, payload, created_at)
                VALUES ($1, $2, $3)
                RETURNING id
                "#,
            )
            .bind(&post.id)
            .bind(event_payload)
            .bind(post.created_at)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, sqlx::Error>(outbox_id)
        })
        .await
    }
}
