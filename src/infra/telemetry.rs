use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    CACHE_ENTRIES, CACHE_HIT_TOTAL, CACHE_INVALIDATE_TOTAL, CACHE_LOAD_ERROR_TOTAL,
    CACHE_MISS_TOTAL, CACHE_NEGATIVE_HIT_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// `RUST_LOG` directives take precedence over the configured level.
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
            CACHE_HIT_TOTAL,
            Unit::Count,
            "Published-page lookups answered from a cached value."
        );
        describe_counter!(
            CACHE_NEGATIVE_HIT_TOTAL,
            Unit::Count,
            "Published-page lookups answered from a cached \"not published\" marker."
        );
        describe_counter!(
            CACHE_MISS_TOTAL,
            Unit::Count,
            "Loader invocations after a cache miss."
        );
        describe_counter!(
            CACHE_LOAD_ERROR_TOTAL,
            Unit::Count,
            "Loader failures swallowed by the cache."
        );
        describe_counter!(
            CACHE_INVALIDATE_TOTAL,
            Unit::Count,
            "Explicit cache invalidations."
        );
        describe_gauge!(
            CACHE_ENTRIES,
            Unit::Count,
            "Current number of positive and negative cache entries."
        );
    });
}
