//! Release pipeline settings.

use crate::core::PipelineStage;
use crate::units::{DeploymentTarget, SERVICE_REPOSITORY, TEST_REPOSITORY};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-run settings of the release pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Repository of the deployable service image.
    #[serde(default = "default_service_repository")]
    pub service_repository: String,
    /// Repository of the integration-test harness image.
    #[serde(default = "default_test_repository")]
    pub test_repository: String,
    /// Tag a push-triggered run resolves in both repositories.
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
    /// Source stage bound.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    /// Build stage bound.
    #[serde(default = "default_build_timeout_ms")]
    pub build_timeout_ms: u64,
    /// Deploy stage bound, including the health gate.
    #[serde(default = "default_deploy_timeout_ms")]
    pub deploy_timeout_ms: u64,
    /// Integration test stage bound.
    #[serde(default = "default_test_timeout_ms")]
    pub test_timeout_ms: u64,
    /// Finished runs kept for inspection; older ones are evicted.
    #[serde(default = "default_run_history")]
    pub run_history: usize,
}

fn default_service_repository() -> String {
    SERVICE_REPOSITORY.to_string()
}

fn default_test_repository() -> String {
    TEST_REPOSITORY.to_string()
}

fn default_source_tag() -> String {
    "latest".to_string()
}

const fn default_source_timeout_ms() -> u64 {
    60_000
}

const fn default_build_timeout_ms() -> u64 {
    900_000
}

const fn default_deploy_timeout_ms() -> u64 {
    1_800_000
}

const fn default_test_timeout_ms() -> u64 {
    900_000
}

const fn default_run_history() -> usize {
    50
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            service_repository: default_service_repository(),
            test_repository: default_test_repository(),
            source_tag: default_source_tag(),
            source_timeout_ms: default_source_timeout_ms(),
            build_timeout_ms: default_build_timeout_ms(),
            deploy_timeout_ms: default_deploy_timeout_ms(),
            test_timeout_ms: default_test_timeout_ms(),
            run_history: default_run_history(),
        }
    }
}

impl PipelineConfig {
    /// Settings pointing at the repositories of a provisioned deployment.
    #[must_use]
    pub fn for_target(target: &DeploymentTarget) -> Self {
        Self {
            service_repository: target.service_repository.clone(),
            test_repository: target.test_repository.clone(),
            ..Self::default()
        }
    }

    /// Sets how many finished runs are kept.
    #[must_use]
    pub fn with_run_history(mut self, runs: usize) -> Self {
        self.run_history = runs;
        self
    }

    /// Sets the bound of one stage.
    #[must_use]
    pub fn with_timeout(mut self, stage: PipelineStage, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        match stage {
            PipelineStage::Source => self.source_timeout_ms = ms,
            PipelineStage::Build => self.build_timeout_ms = ms,
            PipelineStage::Deploy => self.deploy_timeout_ms = ms,
            PipelineStage::IntegrationTest => self.test_timeout_ms = ms,
        }
        self
    }

    /// The bound of `stage`.
    #[must_use]
    pub fn timeout_for(&self, stage: PipelineStage) -> Duration {
        Duration::from_millis(match stage {
            PipelineStage::Source => self.source_timeout_ms,
            PipelineStage::Build => self.build_timeout_ms,
            PipelineStage::Deploy => self.deploy_timeout_ms,
            PipelineStage::IntegrationTest => self.test_timeout_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_track_latest() {
        let config = PipelineConfig::default();
        assert_eq!(config.source_tag, "latest");
        assert_eq!(config.service_repository, "mensaje-service");
        assert_eq!(config.timeout_for(PipelineStage::Source), Duration::from_secs(60));
        assert_eq!(config.run_history, 50);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"source_tag": "stable", "build_timeout_ms": 5000}"#).unwrap();

        assert_eq!(config.source_tag, "stable");
        assert_eq!(config.timeout_for(PipelineStage::Build), Duration::from_secs(5));
        assert_eq!(config.test_repository, "mensaje-service-tests");
    }

    #[test]
    fn test_with_timeout() {
        let config = PipelineConfig::default()
            .with_timeout(PipelineStage::Deploy, Duration::from_millis(250));
        assert_eq!(config.timeout_for(PipelineStage::Deploy), Duration::from_millis(250));
        assert_eq!(config.timeout_for(PipelineStage::IntegrationTest), Duration::from_secs(900));
    }
}
