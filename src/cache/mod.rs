//! Post stat cache.
//!
//! Stats are cached aside the relational store under `post_stat:<id>` with a
//! companion `access_count:<id>` counter. Reads bump the counter and an entry
//! that reaches the popularity threshold keeps its value for the extended TTL.
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! standard_ttl_seconds = 3600
//! extended_ttl_seconds = 86400
//! popularity_threshold = 5
//! ```

mod config;
mod keys;
mod popularity;
mod store;

pub use config::CachePolicy;
pub use keys::{access_count_key, stat_key};
pub use popularity::{PopularityCache, StatsError};
pub use store::{CacheError, CacheStore, MemoryCacheStore};
