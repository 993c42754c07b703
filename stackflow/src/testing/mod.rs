//! Testing utilities for topologies and release runs.
//!
//! This module provides:
//! - Static units and an in-memory control plane
//! - Scripted image resolver, build, test harness and health probe
//! - A ready-wired release harness

mod fixtures;
mod mocks;

pub use fixtures::{fast_health, ReleaseHarness};
pub use mocks::{
    InMemoryProvisioner, ScriptedBuildRunner, ScriptedHealthProbe, ScriptedTestRunner,
    StaticImageResolver, StaticUnit, TEST_REGISTRY_HOST,
};
