//! Scoped, deadline-bounded borrowing of pooled connections.
//!
//! A [`ConnectionLease`] returns its connection to the pool when dropped, on
//! every exit path. Work run through [`within`] is cancelled once the lease's
//! hold bound passes, which releases the connection instead of leaking it.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use sqlx::Postgres;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool};
use tokio::time::{Instant, timeout_at};
use tracing::warn;

use crate::application::repos::RepoError;

use super::util::map_sqlx_error;

pub struct ConnectionLease {
    conn: PoolConnection<Postgres>,
    acquired_at: Instant,
    max_hold: Duration,
    op: &'static str,
}

impl ConnectionLease {
    pub(crate) async fn acquire(
        pool: &PgPool,
        max_hold: Duration,
        op: &'static str,
    ) -> Result<Self, RepoError> {
        let conn = pool.acquire().await.map_err(map_sqlx_error)?;
        Ok(Self {
            conn,
            acquired_at: Instant::now(),
            max_hold,
            op,
        })
    }

    pub fn deadline(&self) -> Instant {
        self.acquired_at + self.max_hold
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Deref for ConnectionLease {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for ConnectionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        let held = self.held_for();
        if held > self.max_hold {
            warn!(
                target = "poststat::infra::db::lease",
                op = self.op,
                held_ms = held.as_millis() as u64,
                max_hold_ms = self.max_hold.as_millis() as u64,
                "connection held past its bound"
            );
        }
    }
}

/// Await `fut` until `deadline`; an expired deadline becomes [`RepoError::Timeout`].
pub(crate) async fn within<T, F>(
    deadline: Instant,
    op: &'static str,
    fut: F,
) -> Result<T, RepoError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match timeout_at(deadline, fut).await {
        Ok(result) => result.map_err(map_sqlx_error),
        Err(_) => {
            warn!(
                target = "poststat::infra::db::lease",
                op, "database call cancelled at connection hold bound"
            );
            Err(RepoError::Timeout)
        }
    }
}
