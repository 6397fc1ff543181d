mod support;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use poststat::application::jobs::AnalysisError;
use poststat::application::posts::PostError;
use poststat::domain::error::PostValidationError;
use poststat::domain::types::PostStatus;
use poststat::infra::broker::{
    BatchControl, BrokerError, InboundMessage, StopReason, process_batch,
};

use support::Harness;

/// Partition control that can simulate a crash right before the commit point moves.
struct CrashingControl {
    fail_resolve: AtomicBool,
    resolved: Mutex<Vec<i64>>,
}

impl CrashingControl {
    fn new(fail_resolve: bool) -> Self {
        Self {
            fail_resolve: AtomicBool::new(fail_resolve),
            resolved: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BatchControl for CrashingControl {
    fn is_running(&self) -> bool {
        true
    }

    fn is_stale(&self) -> bool {
        false
    }

    fn resolve_offset(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        if self.fail_resolve.load(Ordering::SeqCst) {
            return Err(BrokerError::Liveness("process killed".to_string()));
        }
        self.resolved.lock().expect("lock").push(message.offset);
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

fn delivered(offset: i64, key: &str, value: &str) -> InboundMessage {
    InboundMessage {
        topic: "post".to_string(),
        partition: 0,
        offset,
        key: Some(key.to_string()),
        payload: Some(value.as_bytes().to_vec()),
    }
}

#[tokio::test]
async fn create_post_persists_and_publishes_event() {
    let harness = Harness::new();

    let post = harness
        .service
        .create_post("p1", "Hello world foo")
        .await
        .expect("post created");

    assert_eq!(post.id, "p1");
    assert_eq!(post.status, PostStatus::Active);
    assert_eq!(post.created_at, post.updated_at);

    let sent = harness.publisher.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].key, "p1");
    let value: serde_json::Value = serde_json::from_str(&sent[0].value).expect("json event");
    assert_eq!(value["id"], "p1");
    assert_eq!(value["body"], "Hello world foo");
    assert_eq!(value["status"], "ACTIVE");

    let outbox = harness.posts.outbox_entries().await;
    assert_eq!(outbox.len(), 1);
    assert!(outbox[0].published_at.is_some());
}

#[tokio::test]
async fn second_create_with_same_id_is_a_duplicate() {
    let harness = Harness::new();

    harness
        .service
        .create_post("dup", "first body")
        .await
        .expect("first create");
    let err = harness
        .service
        .create_post("dup", "second body")
        .await
        .expect_err("duplicate");

    assert!(matches!(err, PostError::Duplicate));
    assert_eq!(err.to_string(), "Post already exists");
    assert_eq!(harness.posts.post_count().await, 1);
    assert_eq!(harness.publisher.sent().await.len(), 1);
}

#[tokio::test]
async fn invalid_bodies_never_reach_storage() {
    let harness = Harness::new();
    let too_long = "a".repeat(1001);

    for (body, expected) in [
        ("!! ?? ..", PostValidationError::OnlyExcludedCharacters),
        (too_long.as_str(), PostValidationError::TooLong),
        (" ", PostValidationError::EmptyBody),
    ] {
        let err = harness
            .service
            .create_post("p1", body)
            .await
            .expect_err("invalid body");
        match err {
            PostError::Invalid(reason) => assert_eq!(reason, expected),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(harness.posts.post_count().await, 0);
    assert!(harness.posts.outbox_entries().await.is_empty());
    assert!(harness.publisher.sent().await.is_empty());
}

#[tokio::test]
async fn store_failure_is_reported_as_bad_request() {
    let harness = Harness::new();
    harness.posts.fail_writes.store(true, Ordering::SeqCst);

    let err = harness
        .service
        .create_post("p1", "Hello world")
        .await
        .expect_err("store failure");

    assert!(matches!(err, PostError::BadRequest(_)));
    assert_eq!(err.to_string(), "Invalid post");
    assert!(harness.publisher.sent().await.is_empty());
}

#[tokio::test]
async fn failed_publish_is_recovered_by_outbox_relay() {
    let harness = Harness::new();
    harness.publisher.fail.store(true, Ordering::SeqCst);

    harness
        .service
        .create_post("p1", "Hello world foo")
        .await
        .expect("write succeeds even when the broker is down");

    assert!(harness.publisher.sent().await.is_empty());
    let pending = harness.posts.outbox_entries().await;
    assert_eq!(pending.len(), 1);
    assert!(pending[0].published_at.is_none());

    assert!(harness.relay.relay_once().await.is_err());

    harness.publisher.fail.store(false, Ordering::SeqCst);
    assert_eq!(harness.relay.relay_once().await.expect("relay"), 1);
    assert_eq!(harness.relay.relay_once().await.expect("relay"), 0);

    let sent = harness.publisher.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].key, "p1");
    assert!(
        harness.posts.outbox_entries().await[0]
            .published_at
            .is_some()
    );
}

#[tokio::test]
async fn published_event_produces_word_stats() {
    let harness = Harness::new();
    harness
        .service
        .create_post("p1", "Hello world foo")
        .await
        .expect("post created");
    let event = harness.publisher.sent().await.remove(0);

    let stat = harness
        .analysis
        .process_post(&event.value)
        .await
        .expect("analysis");

    assert_eq!(stat.post_id, "p1");
    assert_eq!(stat.word_count, 3);
    assert!((stat.avg_word_length - 13.0 / 3.0).abs() < 1e-12);

    let cached = harness.cache.get_stat("p1").await.expect("stat readable");
    assert_eq!(cached.word_count, 3);
}

#[tokio::test]
async fn malformed_event_is_not_found() {
    let harness = Harness::new();

    let err = harness
        .analysis
        .process_post(r#"{"id":"p1"}"#)
        .await
        .expect_err("missing body");

    assert!(matches!(err, AnalysisError::NotFound));
    assert!(harness.stats.rows_for("p1").await.is_empty());
}

#[tokio::test]
async fn redelivered_batch_duplicates_stat_rows() {
    let harness = Harness::new();
    let first = r#"{"id":"p1","body":"Hello world foo"}"#;
    let second = r#"{"id":"p2","body":"one two"}"#;
    let batch = vec![delivered(40, "p1", first), delivered(41, "p2", second)];

    // Handler runs for the first message, then the process dies before marking it.
    let crashed = CrashingControl::new(true);
    let outcome = process_batch(harness.analysis.as_ref(), &crashed, &batch).await;
    assert_eq!(outcome.marked, 0);
    let stop = outcome.stop.expect("stopped");
    assert_eq!(stop.reason, StopReason::ResolveFailed);
    assert_eq!(stop.resume_at, Some(40));

    // The group redelivers from the last commit point: both messages again.
    let restarted = CrashingControl::new(false);
    let outcome = process_batch(harness.analysis.as_ref(), &restarted, &batch).await;
    assert_eq!(outcome.marked, 2);
    assert_eq!(outcome.stop, None);
    assert_eq!(*restarted.resolved.lock().expect("lock"), vec![40, 41]);

    let p1_rows = harness.stats.rows_for("p1").await;
    assert_eq!(p1_rows.len(), 2);
    assert_eq!(p1_rows[0].word_count, p1_rows[1].word_count);
    assert_eq!(harness.stats.rows_for("p2").await.len(), 1);
}

#[tokio::test]
async fn handler_failure_stops_batch_before_later_messages() {
    let harness = Harness::new();
    let batch = vec![
        delivered(7, "bad", "not json"),
        delivered(8, "p2", r#"{"id":"p2","body":"one two"}"#),
    ];

    let control = CrashingControl::new(false);
    let outcome = process_batch(harness.analysis.as_ref(), &control, &batch).await;

    assert_eq!(outcome.marked, 0);
    let stop = outcome.stop.expect("stopped");
    assert_eq!(stop.reason, StopReason::HandlerFailed);
    assert_eq!(stop.resume_at, Some(7));
    assert!(harness.stats.rows_for("p2").await.is_empty());
}
