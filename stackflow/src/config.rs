//! Environment configuration for the mensaje deployment.

use crate::errors::StackflowError;
use serde::{Deserialize, Serialize};

/// Runtime configuration shared by all units of a deployment.
///
/// Loaded from `MENSAJE_*` environment variables; every field has a default
/// so an empty environment yields a usable `dev` configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Name of the environment, injected into containers as `ENV`.
    #[serde(default = "default_environment_name")]
    pub environment_name: String,
    /// Region for every unit except the image registry.
    #[serde(default = "default_region")]
    pub region: String,
    /// Region the image registry lives in.
    #[serde(default = "default_region")]
    pub registry_region: String,
    /// Log level passed to the service as `LOG_LEVEL`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Message retention in days, passed as `TTL_DAYS`.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
    /// Port the container listens on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_environment_name() -> String {
    "dev".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_ttl_days() -> u32 {
    7
}

const fn default_port() -> u16 {
    80
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            environment_name: default_environment_name(),
            region: default_region(),
            registry_region: default_region(),
            log_level: default_log_level(),
            ttl_days: default_ttl_days(),
            port: default_port(),
        }
    }
}

impl EnvironmentConfig {
    /// Prefix of the environment variables read by [`Self::from_env`].
    pub const ENV_PREFIX: &'static str = "MENSAJE_";

    /// Builds the config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`StackflowError::Config`] if a variable is present but malformed.
    pub fn from_env() -> Result<Self, StackflowError> {
        Ok(envy::prefixed(Self::ENV_PREFIX).from_env::<Self>()?)
    }

    /// Builds the config from explicit key/value pairs (keys without prefix).
    ///
    /// # Errors
    ///
    /// Returns [`StackflowError::Config`] if a value is malformed.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, StackflowError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::from_iter::<_, Self>(pairs)?)
    }

    /// Sets the environment name.
    #[must_use]
    pub fn with_environment_name(mut self, name: impl Into<String>) -> Self {
        self.environment_name = name.into();
        self
    }

    /// Sets the deployment region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }
}
