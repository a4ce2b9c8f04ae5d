//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format, selected by the `RUST_ENV` environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    /// Human-readable, for development.
    Pretty,
    /// One JSON object per line, for log collectors.
    Json,
}

fn format_from_env() -> LogFormat {
    match std::env::var("RUST_ENV").as_deref() {
        Ok("production") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

/// Initialize the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise defaults to
/// `info` globally with `debug` for this workspace's crates. Fails if a
/// subscriber is already installed.
pub fn init_logging() -> TelemetryResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pilot=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format_from_env() {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init(),
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_defaults_to_pretty() {
        // RUST_ENV is unset in the test environment.
        assert_eq!(format_from_env(), LogFormat::Pretty);
    }
}
