//! Logging initialization and configuration.

use crate::config::LogFormat;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter directives for a base level.
///
/// hyper's own connection chatter is capped at `warn` unless `RUST_LOG`
/// says otherwise.
fn filter_directives(level: &str) -> String {
    format!("{},hyper=warn,rustls=warn", level.to_lowercase())
}

/// Initialize the logging system.
///
/// # Arguments
///
/// * `level` - Log level filter (e.g., "info", "debug")
/// * `format` - Log output format
pub fn init_logging(level: &str, format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level)));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            registry
                .with(fmt::layer().json().with_current_span(true))
                .init();
        }
        LogFormat::Pretty => {
            registry.with(fmt::layer().pretty()).init();
        }
        LogFormat::Compact => {
            registry.with(fmt::layer().compact().with_target(false)).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: Can only init logging once per process, so we don't test init_logging directly
    #[test]
    fn test_filter_directives() {
        assert_eq!(filter_directives("DEBUG"), "debug,hyper=warn,rustls=warn");
        assert!(EnvFilter::try_new(filter_directives("info")).is_ok());
    }
}
