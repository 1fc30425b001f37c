use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_CACHE_ENTRIES, METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATE, METRIC_CACHE_MISS,
    METRIC_CACHE_SWEPT,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Output goes to stderr so command results on stdout stay machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
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
            "Collection reads served from the session cache."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Collection reads that went to the remote repository."
        );
        describe_counter!(
            METRIC_CACHE_INVALIDATE,
            Unit::Count,
            "Collection slots cleared after a write."
        );
        describe_counter!(
            METRIC_CACHE_SWEPT,
            Unit::Count,
            "Session entries removed by the background sweeper."
        );
        describe_gauge!(
            METRIC_CACHE_ENTRIES,
            Unit::Count,
            "Sessions currently holding a cache entry."
        );
    });
}
