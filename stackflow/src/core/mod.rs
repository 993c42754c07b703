//! Core domain model types for stackflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Unit lifecycle, stage and run status enums
//! - Content-addressed stage artifacts
//! - Lifecycle events

mod artifact;
mod event;
mod status;

pub use artifact::{Artifact, ArtifactKind, ContentDigest};
pub use event::FlowEvent;
pub use status::{PipelineStage, RunStatus, StageStatus, UnitState};
