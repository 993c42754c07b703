//! Liveness probing of service instances.

use super::ServiceInstance;
use crate::utils::BackoffConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health gate settings for rolling deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Liveness path answered by the service.
    #[serde(default = "default_path")]
    pub path: String,
    /// How long new instances have to become healthy.
    #[serde(default = "default_gate_timeout_ms")]
    pub gate_timeout_ms: u64,
    /// Delay between probe rounds.
    #[serde(default = "default_poll")]
    pub poll: BackoffConfig,
}

fn default_path() -> String {
    "/ping".to_string()
}

const fn default_gate_timeout_ms() -> u64 {
    300_000
}

fn default_poll() -> BackoffConfig {
    BackoffConfig::constant(Duration::from_secs(5))
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            gate_timeout_ms: default_gate_timeout_ms(),
            poll: default_poll(),
        }
    }
}

impl HealthCheckConfig {
    /// Sets the gate timeout.
    #[must_use]
    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the poll schedule.
    #[must_use]
    pub fn with_poll(mut self, poll: BackoffConfig) -> Self {
        self.poll = poll;
        self
    }

    /// The gate timeout as a duration.
    #[must_use]
    pub fn gate_timeout(&self) -> Duration {
        Duration::from_millis(self.gate_timeout_ms)
    }
}

/// Answers whether an instance is live.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probes `path` on `instance`. Any error counts as unhealthy.
    async fn check(&self, instance: &ServiceInstance, path: &str) -> bool;
}

/// Probes the load-balanced endpoint over HTTP.
///
/// Every instance is checked through the same base URL, so this is only
/// meaningful with a single target behind the balancer.
#[cfg(feature = "http-probe")]
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http-probe")]
impl HttpHealthProbe {
    /// Creates a probe against `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[cfg(feature = "http-probe")]
#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, instance: &ServiceInstance, path: &str) -> bool {
        let url = format!("{}{}", self.base_url, path);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(
                    instance = %instance.id,
                    url = %url,
                    error = %e,
                    "Liveness probe failed"
                );
                false
            }
        }
    }
}
