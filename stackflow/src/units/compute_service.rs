//! The Fargate-style service unit: cluster, task definition, load balancer,
//! scaling and IAM grants.

use super::keys;
use crate::compute::{HealthCheckConfig, ScalingPolicy, DEFAULT_CONTAINER};
use crate::config::EnvironmentConfig;
use crate::errors::DefinitionError;
use crate::topology::{ResolvedInputs, ResourceDeclaration, ResourceUnit};
use serde_json::json;

/// Data-plane actions granted on each table.
const TABLE_DATA_ACTIONS: &[&str] = &[
    "dynamodb:BatchGetItem",
    "dynamodb:GetItem",
    "dynamodb:Query",
    "dynamodb:Scan",
    "dynamodb:ConditionCheckItem",
    "dynamodb:BatchWriteItem",
    "dynamodb:PutItem",
    "dynamodb:UpdateItem",
    "dynamodb:DeleteItem",
    "dynamodb:DescribeTable",
];

/// Unit that runs the message service behind a public load balancer.
#[derive(Debug, Clone)]
pub struct ServiceUnit {
    name: String,
    config: EnvironmentConfig,
    cluster_name: String,
    service_name: String,
    load_balancer_name: String,
    container: String,
    cpu: u32,
    memory_mib: u32,
    log_retention_days: u32,
    health: HealthCheckConfig,
    scaling: ScalingPolicy,
}

impl ServiceUnit {
    /// Creates the service unit for an environment.
    #[must_use]
    pub fn new(name: impl Into<String>, config: EnvironmentConfig) -> Self {
        Self {
            name: name.into(),
            config,
            cluster_name: "ServiceCluster".to_string(),
            service_name: "MensajeService".to_string(),
            load_balancer_name: "MensajeLB".to_string(),
            container: DEFAULT_CONTAINER.to_string(),
            cpu: 256,
            memory_mib: 512,
            log_retention_days: 7,
            health: HealthCheckConfig::default(),
            scaling: ScalingPolicy::default(),
        }
    }

    /// Sets the scaling policy.
    #[must_use]
    pub fn with_scaling(mut self, scaling: ScalingPolicy) -> Self {
        self.scaling = scaling;
        self
    }

    /// Sets the health check.
    #[must_use]
    pub fn with_health(mut self, health: HealthCheckConfig) -> Self {
        self.health = health;
        self
    }

    /// The scaling policy the service is declared with.
    #[must_use]
    pub fn scaling(&self) -> &ScalingPolicy {
        &self.scaling
    }

    /// The health check the load balancer uses.
    #[must_use]
    pub fn health(&self) -> &HealthCheckConfig {
        &self.health
    }

    fn table_keys() -> [&'static str; 3] {
        [keys::TABLE_MENSAJES, keys::TABLE_SEGUIDORES, keys::TABLE_TIMELINE]
    }

    fn environment(&self, inputs: &ResolvedInputs) -> Result<serde_json::Value, DefinitionError> {
        let base_url = format!("http://${{{}.DNSName}}", self.load_balancer_name);
        Ok(json!([
            { "Name": "BASE_URL", "Value": base_url },
            { "Name": "ENV", "Value": self.config.environment_name },
            { "Name": "LOG_LEVEL", "Value": self.config.log_level },
            { "Name": "TTL_DAYS", "Value": self.config.ttl_days.to_string() },
            { "Name": "DDB_TABLE_MENSAJES", "Value": inputs.require(keys::TABLE_MENSAJES)? },
            { "Name": "DDB_TABLE_SEGUIDORES", "Value": inputs.require(keys::TABLE_SEGUIDORES)? },
            { "Name": "DDB_TABLE_TIMELINE", "Value": inputs.require(keys::TABLE_TIMELINE)? },
            { "Name": "PORT", "Value": self.config.port.to_string() }
        ]))
    }
}

impl ResourceUnit for ServiceUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> &str {
        &self.config.region
    }

    fn produces(&self) -> Vec<String> {
        vec![
            keys::SERVICE_CLUSTER_NAME.to_string(),
            keys::SERVICE_NAME.to_string(),
            keys::SERVICE_ENDPOINT.to_string(),
        ]
    }

    fn consumes(&self) -> Vec<String> {
        let mut consumed = vec![
            keys::NETWORK_VPC_ID.to_string(),
            keys::REGISTRY_IDENTIFIER.to_string(),
            keys::REGISTRY_ARN.to_string(),
        ];
        consumed.extend(Self::table_keys().iter().map(ToString::to_string));
        consumed
    }

    fn declarations(
        &self,
        inputs: &ResolvedInputs,
    ) -> Result<Vec<ResourceDeclaration>, DefinitionError> {
        let vpc = inputs.require(keys::NETWORK_VPC_ID)?;
        let repository = inputs.require(keys::REGISTRY_IDENTIFIER)?;
        let repository_arn = inputs.require(keys::REGISTRY_ARN)?;
        let tables: Vec<&str> = Self::table_keys()
            .iter()
            .map(|k| inputs.require(k))
            .collect::<Result<_, _>>()?;

        let cluster = ResourceDeclaration::new("MensajeCluster", "AWS::ECS::Cluster")
            .with_properties(json!({
                "ClusterName": self.cluster_name,
                "Vpc": vpc,
                "ContainerInsights": true
            }));
        let log_group = ResourceDeclaration::new("MensajeLogGroup", "AWS::Logs::LogGroup")
            .with_properties(json!({ "RetentionInDays": self.log_retention_days }));
        let task = ResourceDeclaration::new("TaskDef", "AWS::ECS::TaskDefinition")
            .with_properties(json!({
                "Cpu": self.cpu,
                "MemoryMiB": self.memory_mib,
                "ContainerDefinitions": [{
                    "Name": self.container,
                    "Image": format!("{repository}:latest"),
                    "RepositoryArn": repository_arn,
                    "PortMappings": [{ "ContainerPort": self.config.port }],
                    "Environment": self.environment(inputs)?,
                    "Logging": { "LogGroup": "MensajeLogGroup", "StreamPrefix": "Acortador" }
                }]
            }));
        let access = ResourceDeclaration::new("MensajeTableAccess", "AWS::IAM::Policy")
            .with_properties(json!({
                "Roles": ["TaskDef.TaskRole"],
                "Statements": [
                    { "Effect": "Allow", "Actions": TABLE_DATA_ACTIONS, "Resources": tables },
                    {
                        "Effect": "Allow",
                        "Actions": ["cloudwatch:PutMetricData"],
                        "Resources": ["*"]
                    }
                ]
            }));
        let load_balancer = ResourceDeclaration::new(
            &self.load_balancer_name,
            "AWS::ElasticLoadBalancingV2::LoadBalancer",
        )
        .with_properties(json!({
            "Name": self.load_balancer_name,
            "Scheme": "internet-facing",
            "ListenerPort": 80,
            "HealthCheck": { "Path": self.health.path }
        }));
        let service = ResourceDeclaration::new("MensajeService", "AWS::ECS::Service")
            .with_properties(json!({
                "ServiceName": self.service_name,
                "Cluster": self.cluster_name,
                "TaskDefinition": "TaskDef",
                "DesiredCount": self.scaling.min_capacity,
                "AssignPublicIp": true,
                "Subnets": "PRIVATE_WITH_EGRESS",
                "LoadBalancer": self.load_balancer_name
            }));
        let scaling =
            ResourceDeclaration::new("CpuScaling", "AWS::ApplicationAutoScaling::ScalingPolicy")
                .with_properties(json!({
                    "MinCapacity": self.scaling.min_capacity,
                    "MaxCapacity": self.scaling.max_capacity,
                    "TargetUtilizationPercent": self.scaling.target_utilization,
                    "ScaleInCooldownSecs": self.scaling.scale_in_cooldown_secs,
                    "ScaleOutCooldownSecs": self.scaling.scale_out_cooldown_secs
                }));

        Ok(vec![cluster, log_group, task, access, load_balancer, service, scaling])
    }
}
