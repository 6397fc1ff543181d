//! Postgres-backed repository implementations.

mod lease;
mod outbox;
mod post_stats;
mod posts;
mod util;

pub use lease::ConnectionLease;
pub use util::map_sqlx_error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::application::repos::{HealthRepo, RepoError};

use lease::within;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
    max_hold: Duration,
}

impl PostgresRepositories {
    /// `max_hold` bounds how long any single repository call may keep a pooled connection.
    pub fn new(pool: PgPool, max_hold: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            max_hold,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub(crate) async fn lease(&self, op: &'static str) -> Result<ConnectionLease, RepoError> {
        ConnectionLease::acquire(&self.pool, self.max_hold, op).await
    }
}

#[async_trait]
impl HealthRepo for PostgresRepositories {
    async fn ping(&self) -> Result<(), RepoError> {
        let mut lease = self.lease("health_check").await?;
        let deadline = lease.deadline();
        within(
            deadline,
            "health_check",
            sqlx::query("SELECT 1").execute(&mut *lease),
        )
        .await
        .map(|_| ())
    }
}
