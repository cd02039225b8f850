use crate::config::LoggingConfig;
use sentry::types::{Dsn, ParseDsnError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. When a Sentry DSN
/// is configured, error events are reported there as well; the returned
/// guard must be held until shutdown so pending events are flushed.
pub fn init(config: Option<&LoggingConfig>) -> Result<Option<sentry::ClientInitGuard>, ParseDsnError> {
    let guard = match config.and_then(|c| c.sentry_dsn.as_deref()) {
        Some(dsn) => Some(sentry::init(sentry::ClientOptions {
            dsn: Some(dsn.parse::<Dsn>()?),
            release: sentry::release_name!(),
            ..Default::default()
        })),
        None => None,
    };

    let level = config.map_or("info", |c| c.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();

    Ok(guard)
}
