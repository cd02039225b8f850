use monitoring::{MonitorConfig, MonitorError};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Empty entity namespace name")]
    EmptyNamespace,

    #[error("Upstream timeout cannot be 0: {0}")]
    InvalidUpstreamTimeout(Url),

    #[error("Unsupported upstream scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid monitoring options: {0}")]
    Monitoring(#[from] MonitorError),
}

fn default_namespace() -> String {
    "entities".to_string()
}

/// Worker configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for requests routed to entities
    pub listener: Listener,
    /// Admin listener serving health and readiness checks
    pub admin_listener: Listener,
    /// Monitoring for the front dispatcher
    #[serde(default)]
    pub monitoring: MonitorConfig,
    /// Called by the dispatcher before routing each request
    #[serde(default)]
    pub upstream: Option<UpstreamConfig>,
    #[serde(default)]
    pub entity: EntityConfig,
}

/// Configuration of the entity namespace and its handlers
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EntityConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Monitoring for entity handlers. Falls back to the dispatcher's.
    #[serde(default)]
    pub monitoring: Option<MonitorConfig>,
    /// Called by every entity handler before it responds
    #[serde(default)]
    pub upstream: Option<UpstreamConfig>,
}

impl Default for EntityConfig {
    fn default() -> Self {
        EntityConfig {
            namespace: default_namespace(),
            monitoring: None,
            upstream: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.entity.namespace.is_empty() {
            return Err(ValidationError::EmptyNamespace);
        }

        for upstream in [&self.upstream, &self.entity.upstream].into_iter().flatten() {
            upstream.validate()?;
        }

        self.monitoring.validate()?;
        if let Some(monitoring) = &self.entity.monitoring {
            monitoring.validate()?;
        }

        Ok(())
    }

    /// Monitoring options for entity handlers
    pub fn entity_monitoring(&self) -> MonitorConfig {
        self.entity
            .monitoring
            .clone()
            .unwrap_or_else(|| self.monitoring.clone())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    5
}

/// Outbound HTTP call made while handling a request
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    pub url: Url,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !matches!(self.url.scheme(), "http" | "https") {
            return Err(ValidationError::UnsupportedScheme(
                self.url.scheme().to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidUpstreamTimeout(self.url.clone()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
