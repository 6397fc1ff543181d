//! Cache key layout shared by every cache backend.

const STAT_PREFIX: &str = "post_stat:";
const ACCESS_COUNT_PREFIX: &str = "access_count:";

pub fn stat_key(post_id: &str) -> String {
    format!("{STAT_PREFIX}{post_id}")
}

pub fn access_count_key(post_id: &str) -> String {
    format!("{ACCESS_COUNT_PREFIX}{post_id}")
}
