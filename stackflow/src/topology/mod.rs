//! Deployment topology: resource units, depends-on edges and the orchestrator.
//!
//! A [`TopologyGraph`] is built once at definition time and passed to an
//! [`Orchestrator`], which provisions units in dependency order and threads
//! each unit's [`UnitOutputs`] into the [`ResolvedInputs`] of its dependents.

mod graph;
mod lifecycle;
mod orchestrator;
mod unit;

pub use graph::TopologyGraph;
pub use lifecycle::{Transition, UnitLifecycle};
pub use orchestrator::{Orchestrator, ProvisionReport, ProvisionRequest, ResourceProvisioner};
pub use unit::{ResolvedInputs, ResourceDeclaration, ResourceUnit, UnitOutputs};
