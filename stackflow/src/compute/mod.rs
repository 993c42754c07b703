//! The compute service behind the load balancer.
//!
//! Deployments are rolling and health-gated, scaling is a target-tracking
//! loop on CPU utilization, and unhealthy instances are replaced.

mod descriptor;
mod health;
mod scaling;
mod service;

pub use descriptor::{ContainerImage, DeploymentDescriptor, DESCRIPTOR_FILE};
#[cfg(feature = "http-probe")]
pub use health::HttpHealthProbe;
pub use health::{HealthCheckConfig, HealthProbe};
pub use scaling::{HoldReason, ScalingController, ScalingDecision, ScalingPolicy};
pub use service::{ComputeService, DeploymentReceipt, ServiceInstance, DEFAULT_CONTAINER};
