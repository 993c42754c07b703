//! Error types for topology definition, provisioning and release runs.
//!
//! Errors fall into four families:
//!
//! - definition errors, caught before anything is provisioned
//! - lifecycle and provisioning errors raised while walking the topology
//! - source resolution errors that stop a release run before Build
//! - stage failures (including health gate timeouts) that end a run

use crate::core::{PipelineStage, UnitState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for stackflow operations.
#[derive(Debug, Error)]
pub enum StackflowError {
    /// The topology definition is invalid.
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    /// A unit was asked to make an illegal state transition.
    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    /// The control plane failed to provision or destroy a unit.
    #[error("{0}")]
    Provisioning(#[from] ProvisioningError),

    /// A release stage returned non-success.
    #[error("{0}")]
    Stage(#[from] StageFailure),

    /// A rolling deployment never became healthy.
    #[error("{0}")]
    HealthGate(#[from] HealthGateTimeout),

    /// A unit cannot be destroyed while dependents still hold resources.
    #[error("Unit '{unit}' still has live dependents: {}", dependents.join(", "))]
    DependentsAlive {
        /// The unit that was asked to tear down.
        unit: String,
        /// Dependents that are not destroyed yet.
        dependents: Vec<String>,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<envy::Error> for StackflowError {
    fn from(err: envy::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl StackflowError {
    /// Returns true if the error was raised before any provisioning began.
    #[must_use]
    pub fn is_definition_error(&self) -> bool {
        matches!(self, Self::Definition(_))
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "TOPOLOGY-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when the dependency edges contain a cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cycle detected in topology: {}", cycle_path.join(" -> "))]
pub struct CycleError {
    /// The units forming the cycle; the first unit is repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CycleError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }

    /// Returns one offending `(dependent, dependency)` edge of the cycle.
    #[must_use]
    pub fn offending_edge(&self) -> Option<(&str, &str)> {
        match self.cycle_path.as_slice() {
            [a, b, ..] => Some((a.as_str(), b.as_str())),
            _ => None,
        }
    }

    /// Returns contract diagnostics for the cycle.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        ContractErrorInfo::new(
            "TOPOLOGY-001-CYCLE",
            format!("Topology contains a dependency cycle: {}", self.cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the depends-on edges in the cycle.")
    }
}

/// Errors in the topology definition. All of these are fatal and are
/// reported before any unit starts provisioning.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    /// The dependency edges contain a cycle.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// A unit with the same name was already added.
    #[error("Unit '{unit}' is already declared")]
    DuplicateUnit {
        /// The unit name.
        unit: String,
    },

    /// An edge references a unit that was never added.
    #[error("Unit '{unit}' is not declared in the topology")]
    UnknownUnit {
        /// The unit name.
        unit: String,
    },

    /// A unit was declared to depend on itself.
    #[error("Unit '{unit}' cannot depend on itself")]
    SelfDependency {
        /// The unit name.
        unit: String,
    },

    /// A unit or resource name does not satisfy the naming rules.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A unit consumes an output that none of its dependencies produce.
    #[error("Unit '{unit}' consumes '{key}' but no dependency produces it")]
    UnresolvedInput {
        /// The consuming unit.
        unit: String,
        /// The missing output key.
        key: String,
    },

    /// A dependency was not provisioned when the dependent tried to start.
    #[error("Unit '{unit}' cannot start: dependency '{dependency}' is {state}")]
    UnresolvedDependency {
        /// The unit that tried to start.
        unit: String,
        /// The dependency that is not ready.
        dependency: String,
        /// The dependency's current state.
        state: UnitState,
    },
}

impl DefinitionError {
    /// Creates an unknown unit error.
    #[must_use]
    pub fn unknown_unit(unit: impl Into<String>) -> Self {
        Self::UnknownUnit { unit: unit.into() }
    }

    /// Creates an unresolved input error.
    #[must_use]
    pub fn unresolved_input(unit: impl Into<String>, key: impl Into<String>) -> Self {
        Self::UnresolvedInput {
            unit: unit.into(),
            key: key.into(),
        }
    }

    /// Returns contract diagnostics for the error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        match self {
            Self::Cycle(cycle) => cycle.error_info(),
            Self::DuplicateUnit { unit } => ContractErrorInfo::new(
                "TOPOLOGY-004-DUPLICATE",
                format!("Unit '{unit}' declared twice"),
            )
            .with_fix_hint("Give every unit a unique name."),
            Self::UnknownUnit { unit } => ContractErrorInfo::new(
                "TOPOLOGY-002-MISSING_UNIT",
                format!("Unit '{unit}' not found"),
            )
            .with_fix_hint("Add the unit to the topology before declaring edges that use it."),
            Self::SelfDependency { unit } => ContractErrorInfo::new(
                "TOPOLOGY-005-SELF_EDGE",
                format!("Unit '{unit}' depends on itself"),
            ),
            Self::InvalidName { name, reason } => {
                ContractErrorInfo::new("TOPOLOGY-006-NAME", format!("Invalid name '{name}'"))
                    .with_context_entry("reason", reason.clone())
            }
            Self::UnresolvedInput { unit, key } => ContractErrorInfo::new(
                "TOPOLOGY-003-UNRESOLVED_INPUT",
                format!("Input '{key}' of unit '{unit}' has no producer"),
            )
            .with_fix_hint("Add a depends-on edge to the unit that produces this output."),
            Self::UnresolvedDependency {
                unit, dependency, ..
            } => ContractErrorInfo::new(
                "TOPOLOGY-007-NOT_READY",
                format!("Dependency '{dependency}' of '{unit}' is not provisioned"),
            ),
        }
    }
}

/// Error raised when a unit is asked to make an illegal state transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unit '{unit}' cannot move from {from} to {to}")]
pub struct LifecycleError {
    /// The unit name.
    pub unit: String,
    /// The current state.
    pub from: UnitState,
    /// The requested state.
    pub to: UnitState,
}

impl LifecycleError {
    /// Creates a new lifecycle error.
    #[must_use]
    pub fn new(unit: impl Into<String>, from: UnitState, to: UnitState) -> Self {
        Self {
            unit: unit.into(),
            from,
            to,
        }
    }
}

/// Error raised when the control plane fails to act on a unit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to {operation} unit '{unit}': {reason}")]
pub struct ProvisioningError {
    /// The unit name.
    pub unit: String,
    /// The attempted operation ("provision", "update", "destroy").
    pub operation: String,
    /// The reason reported by the control plane.
    pub reason: String,
}

impl ProvisioningError {
    /// Creates a new provisioning error.
    #[must_use]
    pub fn new(
        unit: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            unit: unit.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when a source image tag cannot be resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot resolve image {repository}:{tag}: {reason}")]
pub struct SourceResolutionError {
    /// The repository name.
    pub repository: String,
    /// The requested tag.
    pub tag: String,
    /// Why resolution failed.
    pub reason: String,
}

impl SourceResolutionError {
    /// Creates a new source resolution error.
    #[must_use]
    pub fn new(
        repository: impl Into<String>,
        tag: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when a rolling deployment never becomes healthy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "Service '{service}' health gate timed out after {waited_ms}ms \
     ({healthy}/{desired} instances healthy)"
)]
pub struct HealthGateTimeout {
    /// The compute service name.
    pub service: String,
    /// Instances that passed the liveness check.
    pub healthy: usize,
    /// Instances that had to pass.
    pub desired: usize,
    /// How long the gate waited.
    pub waited_ms: u64,
}

/// A release stage that returned non-success.
///
/// The stage name and exit status are the only information surfaced to
/// operators for a failed run.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error(
    "Stage {stage} failed{}: {reason}",
    exit_code.map(|c| format!(" (exit {c})")).unwrap_or_default()
)]
pub struct StageFailure {
    /// The failed stage.
    pub stage: PipelineStage,
    /// The exit code, for stages backed by a command execution.
    pub exit_code: Option<i32>,
    /// The failure reason.
    pub reason: String,
}

impl StageFailure {
    /// Creates a failure without an exit code.
    #[must_use]
    pub fn new(stage: PipelineStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            exit_code: None,
            reason: reason.into(),
        }
    }

    /// Creates a failure from a non-zero exit code.
    #[must_use]
    pub fn exited(stage: PipelineStage, exit_code: i32) -> Self {
        Self {
            stage,
            exit_code: Some(exit_code),
            reason: "command exited with non-zero status".to_string(),
        }
    }

    /// Creates a failure for a stage that exceeded its time bound.
    #[must_use]
    pub fn timed_out(stage: PipelineStage, limit: std::time::Duration) -> Self {
        Self::new(stage, format!("exceeded time bound of {}s", limit.as_secs_f64()))
    }
}

impl From<HealthGateTimeout> for StageFailure {
    fn from(err: HealthGateTimeout) -> Self {
        Self::new(PipelineStage::Deploy, err.to_string())
    }
}

impl From<SourceResolutionError> for StageFailure {
    fn from(err: SourceResolutionError) -> Self {
        Self::new(PipelineStage::Source, err.to_string())
    }
}
