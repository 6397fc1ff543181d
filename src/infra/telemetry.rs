use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "poststat_posts_created_total",
            Unit::Count,
            "Total number of posts accepted by the write path."
        );
        describe_counter!(
            "poststat_analysis_processed_total",
            Unit::Count,
            "Total number of analysis events turned into stat rows."
        );
        describe_counter!(
            "poststat_analysis_failed_total",
            Unit::Count,
            "Total number of analysis events whose handler failed."
        );
        describe_counter!(
            "poststat_cache_hit_total",
            Unit::Count,
            "Total number of stat cache hits."
        );
        describe_counter!(
            "poststat_cache_miss_total",
            Unit::Count,
            "Total number of stat cache misses served from the store."
        );
        describe_counter!(
            "poststat_cache_promotion_total",
            Unit::Count,
            "Total number of stats promoted to the extended TTL."
        );
        describe_histogram!(
            "poststat_analysis_ms",
            Unit::Milliseconds,
            "Analysis latency per event in milliseconds."
        );
    });
}
