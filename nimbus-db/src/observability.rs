use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::{NimbusError, config::LogFormat};

/// Install the global subscriber. `RUST_LOG` wins over `log_level`.
pub fn setup_tracing(log_level: &str, format: LogFormat) -> Result<(), NimbusError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);
    let fmt_layer = match format {
        LogFormat::Json => fmt_layer.json().boxed(),
        LogFormat::Plain => fmt_layer.boxed(),
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| NimbusError::Tracing(e.to_string()))?;

    Registry::default()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| NimbusError::Tracing(e.to_string()))
}
