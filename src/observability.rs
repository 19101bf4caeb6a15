//! Tracing setup driven by [`ObservabilityConfig`].

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::types::{LogFormat, ObservabilityConfig};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Later calls are no-ops.
///
/// `RUST_LOG` wins over `config.log_level`; an unparseable level falls back
/// to `info`.
pub fn init_tracing(config: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let result = tracing_subscriber::registry()
            .with(format_layer(config.log_format))
            .with(level_filter(config))
            .try_init();

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

fn format_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Compact => fmt::layer().compact().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    }
}

fn level_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|err| {
            eprintln!("invalid log level {:?}: {err}", config.log_level);
            EnvFilter::new("info")
        })
}
