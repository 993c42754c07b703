//! # Stackflow
//!
//! Deployment topology and release pipeline orchestration for the mensaje
//! message backend.
//!
//! Stackflow models two things:
//!
//! - **Topology**: resource units (stacks) connected by explicit
//!   depends-on edges, resolved into a deterministic provisioning order and
//!   walked by an orchestrator that threads unit outputs into dependents.
//! - **Release pipeline**: the `Source -> Build -> Deploy -> IntegrationTest`
//!   state machine that promotes a published container image into the
//!   compute service, gated by a rolling-deployment health check and a
//!   live-endpoint integration test.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stackflow::prelude::*;
//!
//! let config = EnvironmentConfig::from_env()?;
//! let mut graph = mensaje_topology(&config)?;
//!
//! let orchestrator = Orchestrator::new(provisioner);
//! let report = orchestrator.provision(&mut graph).await?;
//! assert!(report.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod compute;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod testing;
pub mod topology;
pub mod units;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::compute::{
        ComputeService, HealthCheckConfig, HealthProbe, ScalingController, ScalingDecision,
        ScalingPolicy,
    };
    pub use crate::config::EnvironmentConfig;
    pub use crate::core::{
        Artifact, ArtifactKind, FlowEvent, PipelineStage, RunStatus, StageStatus, UnitState,
    };
    pub use crate::errors::{
        ContractErrorInfo, CycleError, DefinitionError, HealthGateTimeout, LifecycleError,
        ProvisioningError, SourceResolutionError, StackflowError, StageFailure,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        BuildRunner, ImagePublished, ImageResolver, PipelineConfig, PipelineRun,
        PipelineTrigger, ReleasePipeline, TestRunner,
    };
    pub use crate::topology::{
        Orchestrator, ProvisionReport, ResourceProvisioner, ResourceUnit, TopologyGraph,
        UnitOutputs,
    };
    pub use crate::units::mensaje_topology;
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
}
