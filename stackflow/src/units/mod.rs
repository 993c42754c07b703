//! Concrete resource units of the mensaje deployment.

mod compute_service;
mod image_registry;
mod network;
mod observability;
mod release_pipeline;
mod table_store;

pub use compute_service::ServiceUnit;
pub use image_registry::{ImageRegistry, Repository, SERVICE_REPOSITORY, TEST_REPOSITORY};
pub use network::NetworkBoundary;
pub use observability::{AlarmUnit, DashboardUnit};
pub use release_pipeline::{DeploymentTarget, PipelineUnit};
pub use table_store::{KeyAttribute, KeyType, SecondaryIndex, TableDefinition, TableStore};

use crate::config::EnvironmentConfig;
use crate::errors::DefinitionError;
use crate::topology::TopologyGraph;
use std::sync::Arc;

/// Output keys exchanged between units.
pub mod keys {
    /// VPC handle.
    pub const NETWORK_VPC_ID: &str = "network.vpc_id";

    /// Physical name of the messages table.
    pub const TABLE_MENSAJES_NAME: &str = "mensajes";
    /// Physical name of the follow-edges table.
    pub const TABLE_SEGUIDORES_NAME: &str = "seguidores";
    /// Physical name of the timeline table.
    pub const TABLE_TIMELINE_NAME: &str = "timeline";
    /// Messages table identifier.
    pub const TABLE_MENSAJES: &str = "table.mensajes";
    /// Follow-edges table identifier.
    pub const TABLE_SEGUIDORES: &str = "table.seguidores";
    /// Timeline table identifier.
    pub const TABLE_TIMELINE: &str = "table.timeline";

    /// Service repository identifier.
    pub const REGISTRY_IDENTIFIER: &str = "registry.identifier";
    /// Service repository ARN.
    pub const REGISTRY_ARN: &str = "registry.arn";
    /// Tag the pipeline tracks.
    pub const REGISTRY_LATEST_TAG: &str = "registry.latest_tag";
    /// Test-harness repository identifier.
    pub const REGISTRY_TEST_IDENTIFIER: &str = "registry.test_identifier";

    /// Cluster name.
    pub const SERVICE_CLUSTER_NAME: &str = "service.cluster_name";
    /// Service name.
    pub const SERVICE_NAME: &str = "service.service_name";
    /// Public endpoint (`http://<lb-dns>`).
    pub const SERVICE_ENDPOINT: &str = "service.endpoint";

    /// Pipeline name.
    pub const PIPELINE_NAME: &str = "pipeline.name";
    /// Dashboard name.
    pub const DASHBOARD_NAME: &str = "dashboard.name";
    /// Alarm name.
    pub const ALARM_NAME: &str = "alarm.name";

    /// Output key of a table by physical name.
    #[must_use]
    pub fn table(table_name: &str) -> String {
        format!("table.{table_name}")
    }
}

/// Unit names of the mensaje topology.
pub mod names {
    /// Network boundary.
    pub const VPC: &str = "MensajeVpcStack";
    /// Tables.
    pub const TABLES: &str = "MensajeTableStack";
    /// Image registry.
    pub const REGISTRY: &str = "MensajeEcrStack";
    /// Compute service.
    pub const SERVICE: &str = "MensajeServiceStack";
    /// Dashboard.
    pub const DASHBOARD: &str = "MensajeDashboardStack";
    /// Release pipeline.
    pub const PIPELINE: &str = "MensajePipelineStack";
    /// Alarms.
    pub const ALARMS: &str = "MensajeAlarmStack";
}

/// Declares the full mensaje topology for an environment.
///
/// The image registry lives in `config.registry_region`; every other unit in
/// `config.region`.
///
/// # Errors
///
/// Returns a [`DefinitionError`] if the declaration is inconsistent.
pub fn mensaje_topology(config: &EnvironmentConfig) -> Result<TopologyGraph, DefinitionError> {
    let region = config.region.as_str();
    let mut graph = TopologyGraph::new(format!("mensaje-{}", config.environment_name));

    graph.add_unit(Arc::new(NetworkBoundary::new(names::VPC, region)))?;
    graph.add_unit(Arc::new(TableStore::mensaje(names::TABLES, region)))?;
    graph.add_unit(Arc::new(ImageRegistry::mensaje(names::REGISTRY, &config.registry_region)))?;
    graph.add_unit(Arc::new(ServiceUnit::new(names::SERVICE, config.clone())))?;
    graph.add_unit(Arc::new(DashboardUnit::new(names::DASHBOARD, region)))?;
    graph.add_unit(Arc::new(PipelineUnit::new(names::PIPELINE, region)))?;
    graph.add_unit(Arc::new(AlarmUnit::new(names::ALARMS, region)))?;

    graph.add_dependency(names::SERVICE, names::VPC)?;
    graph.add_dependency(names::SERVICE, names::TABLES)?;
    graph.add_dependency(names::SERVICE, names::REGISTRY)?;
    graph.add_dependency(names::DASHBOARD, names::SERVICE)?;
    graph.add_dependency(names::PIPELINE, names::SERVICE)?;
    graph.add_dependency(names::PIPELINE, names::REGISTRY)?;
    graph.add_dependency(names::PIPELINE, names::VPC)?;
    graph.add_dependency(names::ALARMS, names::SERVICE)?;

    graph.validate()?;
    Ok(graph)
}
