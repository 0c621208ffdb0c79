use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing::debug;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Font loading and SVG parsing warn about every odd system font and attribute.
const QUIET_DIRECTIVES: [&str; 3] = ["fontdb=error", "usvg=error", "hyper_util=warn"];

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let mut env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();
    for directive in QUIET_DIRECTIVES {
        let directive = directive
            .parse()
            .map_err(|err| InfraError::telemetry(format!("bad directive `{directive}`: {err}")))?;
        env_filter = env_filter.add_directive(directive);
    }

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
        })?;

    debug!(
        target = "chartexport::telemetry",
        level = %logging.level,
        format = ?logging.format,
        "telemetry ready"
    );
    Ok(())
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "chartexport_requests_total",
            Unit::Count,
            "Total number of conversion requests received by the server."
        );
        describe_counter!(
            "chartexport_request_failures_total",
            Unit::Count,
            "Total number of conversion requests answered with an error."
        );
        describe_counter!(
            "chartexport_request_timeouts_total",
            Unit::Count,
            "Total number of conversion requests cut off by the request timeout."
        );
        describe_gauge!(
            "chartexport_renders_in_flight",
            Unit::Count,
            "Current number of conversions holding a render permit."
        );
        describe_histogram!(
            "chartexport_render_ms",
            Unit::Milliseconds,
            "End-to-end conversion latency in milliseconds."
        );
    });
}
