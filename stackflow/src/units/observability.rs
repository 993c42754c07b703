//! Read-only telemetry units: a dashboard and a CPU alarm.

use super::keys;
use crate::errors::DefinitionError;
use crate::topology::{ResolvedInputs, ResourceDeclaration, ResourceUnit};
use serde_json::json;

fn service_dimensions(inputs: &ResolvedInputs) -> Result<serde_json::Value, DefinitionError> {
    Ok(json!({
        "ClusterName": inputs.require(keys::SERVICE_CLUSTER_NAME)?,
        "ServiceName": inputs.require(keys::SERVICE_NAME)?
    }))
}

fn service_keys() -> Vec<String> {
    vec![keys::SERVICE_CLUSTER_NAME.to_string(), keys::SERVICE_NAME.to_string()]
}

/// Dashboard over the service's utilization metrics.
#[derive(Debug, Clone)]
pub struct DashboardUnit {
    name: String,
    region: String,
}

impl DashboardUnit {
    /// Creates the dashboard unit.
    #[must_use]
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
        }
    }
}

impl ResourceUnit for DashboardUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn produces(&self) -> Vec<String> {
        vec![keys::DASHBOARD_NAME.to_string()]
    }

    fn consumes(&self) -> Vec<String> {
        service_keys()
    }

    fn declarations(
        &self,
        inputs: &ResolvedInputs,
    ) -> Result<Vec<ResourceDeclaration>, DefinitionError> {
        let dimensions = service_dimensions(inputs)?;
        Ok(vec![ResourceDeclaration::new("MensajeDashboard", "AWS::CloudWatch::Dashboard")
            .with_properties(json!({
                "DashboardName": "MensajeDashboard",
                "Widgets": [
                    { "Metric": "CPUUtilization", "Dimensions": dimensions },
                    { "Metric": "MemoryUtilization", "Dimensions": dimensions }
                ]
            }))])
    }
}

/// Alarm on sustained high CPU.
#[derive(Debug, Clone)]
pub struct AlarmUnit {
    name: String,
    region: String,
    cpu_threshold: f64,
}

impl AlarmUnit {
    /// Creates the alarm unit with an 80% threshold.
    #[must_use]
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            cpu_threshold: 80.0,
        }
    }

    /// Sets the CPU threshold in percent.
    #[must_use]
    pub fn with_cpu_threshold(mut self, threshold: f64) -> Self {
        self.cpu_threshold = threshold;
        self
    }
}

impl ResourceUnit for AlarmUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn produces(&self) -> Vec<String> {
        vec![keys::ALARM_NAME.to_string()]
    }

    fn consumes(&self) -> Vec<String> {
        service_keys()
    }

    fn declarations(
        &self,
        inputs: &ResolvedInputs,
    ) -> Result<Vec<ResourceDeclaration>, DefinitionError> {
        Ok(vec![ResourceDeclaration::new("MensajeHighCpu", "AWS::CloudWatch::Alarm")
            .with_properties(json!({
                "Metric": "CPUUtilization",
                "Dimensions": service_dimensions(inputs)?,
                "Threshold": self.cpu_threshold,
                "ComparisonOperator": "GreaterThanThreshold"
            }))])
    }
}
