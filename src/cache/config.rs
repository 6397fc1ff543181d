//! TTL policy for cached post stats.

use std::time::Duration;

const DEFAULT_STANDARD_TTL_SECS: u64 = 3600;
const DEFAULT_EXTENDED_TTL_SECS: u64 = 86_400;
const DEFAULT_POPULARITY_THRESHOLD: i64 = 5;

#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// TTL given to an entry when it is written.
    pub standard_ttl: Duration,
    /// TTL given to an entry and its counter once the entry becomes popular.
    pub extended_ttl: Duration,
    /// Access count that promotes an entry; promotion fires only on the exact value.
    pub popularity_threshold: i64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            standard_ttl: Duration::from_secs(DEFAULT_STANDARD_TTL_SECS),
            extended_ttl: Duration::from_secs(DEFAULT_EXTENDED_TTL_SECS),
            popularity_threshold: DEFAULT_POPULARITY_THRESHOLD,
        }
    }
}

impl From<&crate::config::CacheSettings> for CachePolicy {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            standard_ttl: settings.standard_ttl,
            extended_ttl: settings.extended_ttl,
            popularity_threshold: i64::from(settings.popularity_threshold.get()),
        }
    }
}
