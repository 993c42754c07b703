//! Subscriber setup and span helpers for topology walks and release runs.

use crate::config::EnvironmentConfig;
use crate::errors::StackflowError;
use tracing::Span;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Output format of the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `level` when set.
///
/// # Errors
///
/// Returns [`StackflowError::Config`] if `level` is not a valid filter or a
/// global subscriber is already installed.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<(), StackflowError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| {
            StackflowError::Config(format!("invalid log level '{level}': {e}"))
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|e| StackflowError::Config(format!("tracing already initialized: {e}")))
}

/// Installs the subscriber at the environment's log level.
///
/// # Errors
///
/// See [`init_tracing`].
pub fn init_from_config(
    config: &EnvironmentConfig,
    format: LogFormat,
) -> Result<(), StackflowError> {
    init_tracing(&config.log_level, format)
}

/// Span covering one release run.
#[must_use]
pub fn run_span(run_id: Uuid, trigger: &str) -> Span {
    tracing::info_span!("release_run", run_id = %run_id, trigger = %trigger)
}

/// Span covering one control-plane call for a unit.
#[must_use]
pub fn unit_span(unit: &str, operation: &str) -> Span {
    tracing::info_span!("unit", unit = %unit, operation = %operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Instrument;

    #[test]
    fn test_invalid_level_is_config_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = init_tracing("not a [level", LogFormat::Pretty).unwrap_err();
        assert!(matches!(err, StackflowError::Config(_)));
    }

    #[test]
    fn test_spans_wrap_futures() {
        let span = unit_span("MensajeTableStack", "provision");
        let value = tokio_test::block_on(async { 7 }.instrument(span));
        assert_eq!(value, 7);

        let span = run_span(Uuid::now_v7(), "push mensaje-service:latest");
        let _entered = span.enter();
    }
}
