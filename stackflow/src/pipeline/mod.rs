//! Release pipeline execution.
//!
//! This module provides:
//! - Triggers and the per-run state machine
//! - The write-once artifact store shared by the stages of a run
//! - Ports for image resolution, builds and the test harness
//! - The [`ReleasePipeline`] driver

mod artifacts;
mod config;
mod ports;
mod release;
mod run;
mod trigger;


pub use artifacts::ArtifactStore;
pub use config::PipelineConfig;
#[cfg(test)]
pub use ports::MockImageResolver;
pub use ports::{
    BuildRunner, CommandOutcome, DescriptorBuild, ImageReference, ImageResolver, TestRunner,
};
pub use release::ReleasePipeline;
pub use run::{PipelineRun, StageRecord};
pub use trigger::{ImagePublished, PipelineTrigger, RepositoryRole};
