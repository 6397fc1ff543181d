//! Redis-backed [`CacheStore`], single node or cluster.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, FromRedisValue};
use tracing::info;

use crate::cache::{CacheError, CacheStore};

#[derive(Clone)]
enum RedisConnection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

#[derive(Clone)]
pub struct RedisCacheStore {
    connection: RedisConnection,
}

impl RedisCacheStore {
    /// Connect to a single node; the connection manager reconnects on its own.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::backend)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(CacheError::backend)?;
        info!(
            target = "poststat::infra::redis",
            mode = "single",
            "connected to redis"
        );
        Ok(Self {
            connection: RedisConnection::Single(manager),
        })
    }

    /// Connect to a cluster through any of the seed `nodes` (`host:port` or URLs).
    pub async fn connect_cluster(nodes: &[String]) -> Result<Self, CacheError> {
        let urls: Vec<String> = nodes.iter().map(|node| node_url(node)).collect();
        let client = ClusterClient::new(urls).map_err(CacheError::backend)?;
        let connection = client
            .get_async_connection()
            .await
            .map_err(CacheError::backend)?;
        info!(
            target = "poststat::infra::redis",
            mode = "cluster",
            seeds = nodes.len(),
            "connected to redis"
        );
        Ok(Self {
            connection: RedisConnection::Cluster(connection),
        })
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, CacheError> {
        let value: T = match &self.connection {
            RedisConnection::Single(manager) => {
                let mut conn = manager.clone();
                cmd.query_async(&mut conn).await
            }
            RedisConnection::Cluster(cluster) => {
                let mut conn = cluster.clone();
                cmd.query_async(&mut conn).await
            }
        }
        .map_err(CacheError::backend)?;
        Ok(value)
    }
}

fn node_url(node: &str) -> String {
    if node.starts_with("redis://") || node.starts_with("rediss://") {
        node.to_string()
    } else {
        format!("redis://{node}")
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.query(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis(ttl)),
        )
        .await
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.query(redis::cmd("INCR").arg(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.query(redis::cmd("PEXPIRE").arg(key).arg(millis(ttl)))
            .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        // -2 for a missing key, -1 for a key without expiry.
        let remaining: i64 = self.query(redis::cmd("PTTL").arg(key)).await?;
        Ok(u64::try_from(remaining)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_nodes_become_redis_urls() {
        assert_eq!(node_url("10.0.0.1:7000"), "redis://10.0.0.1:7000");
        assert_eq!(node_url("rediss://cache:6380"), "rediss://cache:6380");
    }

    #[test]
    fn ttl_is_sent_in_whole_milliseconds() {
        assert_eq!(millis(Duration::from_secs(3600)), 3_600_000);
        assert_eq!(millis(Duration::ZERO), 1);
    }
}
