mod support;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use time::OffsetDateTime;

use poststat::application::repos::PostStatsRepo;
use poststat::domain::entities::PostStatRecord;

use support::Harness;

fn counter_value(
    snapshot: &[(
        metrics_util::CompositeKey,
        Option<metrics::Unit>,
        Option<metrics::SharedString>,
        DebugValue,
    )],
    name: &str,
) -> u64 {
    snapshot
        .iter()
        .find_map(|(key, _, _, value)| match value {
            DebugValue::Counter(count) if key.key().name() == name => Some(*count),
            _ => None,
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn stat_reads_emit_cache_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let harness = Harness::new();
    let now = OffsetDateTime::now_utc();
    harness
        .stats
        .insert_stat(&PostStatRecord {
            post_id: "hot".to_string(),
            word_count: 2,
            avg_word_length: 3.5,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("seed stat");

    // First read misses and fills the cache; the next six are hits.
    for _ in 0..7 {
        harness.cache.get_stat("hot").await.expect("stat");
    }
    assert!(harness.cache.get_stat("cold").await.is_err());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_value(&snapshot, "poststat_cache_miss_total"), 2);
    assert_eq!(counter_value(&snapshot, "poststat_cache_hit_total"), 6);
    assert_eq!(counter_value(&snapshot, "poststat_cache_promotion_total"), 1);
}
