//! Lifecycle and status enums for units, stages and runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a resource unit.
///
/// ```text
/// Declared -> Provisioning -> Provisioned <-> Updating
///                  |              |
///                  v              v
///               Failed -----> Destroying -> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Added to the topology, nothing created yet.
    #[default]
    Declared,
    /// The control plane is creating the unit.
    Provisioning,
    /// Created; outputs are readable.
    Provisioned,
    /// The control plane is applying a change to a provisioned unit.
    Updating,
    /// The control plane is tearing the unit down.
    Destroying,
    /// Torn down.
    Destroyed,
    /// Provisioning or updating failed.
    Failed,
}

impl UnitState {
    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use UnitState::{
            Declared, Destroyed, Destroying, Failed, Provisioned, Provisioning, Updating,
        };
        matches!(
            (self, next),
            (Declared | Failed | Destroyed, Provisioning)
                | (Provisioning, Provisioned | Failed)
                | (Provisioned, Updating | Destroying)
                | (Updating, Provisioned | Failed)
                | (Failed, Destroying)
                | (Destroying, Destroyed | Failed)
        )
    }

    /// Returns true if dependents may read this unit's outputs.
    #[must_use]
    pub fn exposes_outputs(self) -> bool {
        self == Self::Provisioned
    }

    /// Returns true if the unit no longer holds live resources.
    #[must_use]
    pub fn is_absent(self) -> bool {
        matches!(self, Self::Declared | Self::Destroyed)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Declared => "declared",
            Self::Provisioning => "provisioning",
            Self::Provisioned => "provisioned",
            Self::Updating => "updating",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A stage of the release pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Resolve the service and test-harness images.
    Source,
    /// Turn the service image into a deployment descriptor.
    Build,
    /// Roll the descriptor out to the compute service.
    Deploy,
    /// Run the test harness against the live endpoint.
    IntegrationTest,
}

impl PipelineStage {
    /// All stages in their fixed execution order.
    pub const ORDER: [Self; 4] = [Self::Source, Self::Build, Self::Deploy, Self::IntegrationTest];

    /// Position of the stage in [`Self::ORDER`].
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The stage that must succeed before this one may start.
    #[must_use]
    pub fn predecessor(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::ORDER[i])
    }

    /// The stage that follows this one.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::ORDER.get(self.index() + 1).copied()
    }

    /// Stage name as shown in the pipeline definition.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Source => "Source",
            Self::Build => "Build",
            Self::Deploy => "Deploy",
            Self::IntegrationTest => "IntegrationTests",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Source => "source",
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::IntegrationTest => "integration_test",
        };
        f.write_str(s)
    }
}

/// Execution status of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure.
    Failed,
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Stages are still executing.
    #[default]
    Running,
    /// Every stage passed; the deployment is live and verified.
    Succeeded,
    /// A stage failed.
    Failed,
    /// The run was cancelled between stages.
    Cancelled,
}

impl RunStatus {
    /// Returns true once the run can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
