use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics::{
    METRIC_ADMISSION_TOTAL, METRIC_EVICT_TOTAL, METRIC_FLUSH_TOTAL, METRIC_HOOK_FAILURE_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs are written to stderr; stdout carries command output.
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_ADMISSION_TOTAL,
            Unit::Count,
            "Total number of admission decisions, labelled by outcome."
        );
        describe_counter!(
            METRIC_HOOK_FAILURE_TOTAL,
            Unit::Count,
            "Total number of extension hooks that returned an error or panicked."
        );
        describe_counter!(
            METRIC_FLUSH_TOTAL,
            Unit::Count,
            "Total number of cache entries removed by tag flushes."
        );
        describe_counter!(
            METRIC_EVICT_TOTAL,
            Unit::Count,
            "Total number of cache entries evicted due to capacity."
        );
    });
}
