use thiserror::Error;

/// Errors raised while setting up the monitoring wrapper
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("invalid DSN: {0}")]
    InvalidDsn(#[from] sentry::types::ParseDsnError),

    #[error("traces sample rate must be between 0.0 and 1.0, got {0}")]
    InvalidSampleRate(f32),
}

/// Errors surfaced by fetch handlers
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Upstream request failed for {0}: {1}")]
    Upstream(String, String),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Entity error: {0}")]
    Entity(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Monitor setup failed: {0}")]
    MonitorSetup(#[from] MonitorError),
}
