use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::engine::metrics::{
    METRIC_BYPASS, METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_WRITE_FAILED,
    METRIC_FALLBACK_SERVED, METRIC_INSTALL_MS, METRIC_NAMESPACE_PRUNED, METRIC_NETWORK_FAILURE,
};

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
            METRIC_CACHE_HIT,
            Unit::Count,
            "Requests answered from a cache namespace before any network call."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Cache-first lookups that found no stored entry."
        );
        describe_counter!(
            METRIC_NETWORK_FAILURE,
            Unit::Count,
            "Network fetches that produced no response at all."
        );
        describe_counter!(
            METRIC_CACHE_WRITE_FAILED,
            Unit::Count,
            "Best-effort cache writes that failed, labelled by reason."
        );
        describe_counter!(
            METRIC_FALLBACK_SERVED,
            Unit::Count,
            "Fallback responses served, labelled stale or shell."
        );
        describe_counter!(
            METRIC_BYPASS,
            Unit::Count,
            "Intercepted requests classified to bypass the cache."
        );
        describe_counter!(
            METRIC_NAMESPACE_PRUNED,
            Unit::Count,
            "Stale namespaces deleted during activation."
        );
        describe_histogram!(
            METRIC_INSTALL_MS,
            Unit::Milliseconds,
            "Time spent populating the static namespace during install."
        );
    });
}
