//! The running compute service: rolling deployments, scaling and replacement.

use super::{
    DeploymentDescriptor, HealthCheckConfig, HealthProbe, HoldReason, ScalingController,
    ScalingDecision, ScalingPolicy,
};
use crate::core::{FlowEvent, PipelineStage};
use crate::errors::{HealthGateTimeout, StackflowError, StageFailure};
use crate::events::{EventSink, NoOpEventSink};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Default container name bound by deployment descriptors.
pub const DEFAULT_CONTAINER: &str = "MensajeContainer";

/// One running task of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Instance id, unique per service.
    pub id: String,
    /// Image the instance runs.
    pub image_uri: String,
}

/// Result of a successful rolling deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    /// Service name.
    pub service: String,
    /// Image now serving.
    pub image_uri: String,
    /// Image that served before, if any.
    pub previous_image: Option<String>,
    /// Ids of the new active instances.
    pub instances: Vec<String>,
    /// Time spent waiting on the health gate.
    pub gate_ms: u64,
}

#[derive(Debug)]
struct ServiceState {
    active: Vec<ServiceInstance>,
    image_uri: Option<String>,
    launched: u64,
    scaling: ScalingController,
}

impl ServiceState {
    fn launch(&mut self, service: &str, image_uri: &str) -> ServiceInstance {
        self.launched += 1;
        ServiceInstance {
            id: format!("{service}-{}", self.launched),
            image_uri: image_uri.to_string(),
        }
    }

    fn count(&self) -> u32 {
        u32::try_from(self.active.len()).unwrap_or(u32::MAX)
    }
}

/// Raised for the lifetime of a deployment, lowered on drop.
struct DeployingFlag<'a>(&'a AtomicBool);

impl<'a> DeployingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for DeployingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A load-balanced service running one container image.
///
/// All mutations of the active instance set go through one async mutex.
/// Deployments additionally take the change lock, which provisioning of the
/// service unit shares (see [`ComputeService::change_lock`]), so a rolling
/// deployment never overlaps a control-plane update of the same service.
pub struct ComputeService {
    name: String,
    endpoint: String,
    container: String,
    health: HealthCheckConfig,
    probe: Arc<dyn HealthProbe>,
    events: Arc<dyn EventSink>,
    changes: Arc<Mutex<()>>,
    deploying: AtomicBool,
    state: Mutex<ServiceState>,
}

impl std::fmt::Debug for ComputeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeService")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl ComputeService {
    /// Creates a service with no instances.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            container: DEFAULT_CONTAINER.to_string(),
            health: HealthCheckConfig::default(),
            probe,
            events: Arc::new(NoOpEventSink),
            changes: Arc::new(Mutex::new(())),
            deploying: AtomicBool::new(false),
            state: Mutex::new(ServiceState {
                active: Vec::new(),
                image_uri: None,
                launched: 0,
                scaling: ScalingController::new(ScalingPolicy::default()),
            }),
        }
    }

    /// Sets the container name looked up in descriptors.
    #[must_use]
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    /// Sets the health gate.
    #[must_use]
    pub fn with_health(mut self, health: HealthCheckConfig) -> Self {
        self.health = health;
        self
    }

    /// Sets the scaling policy.
    #[must_use]
    pub fn with_scaling(mut self, policy: ScalingPolicy) -> Self {
        self.state.get_mut().scaling = ScalingController::new(policy);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Public endpoint, e.g. `http://<lb-dns>`.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Lock serializing every change to this service.
    ///
    /// Deployments hold it for their whole duration. Whatever else changes
    /// the service, such as a control-plane update of its unit, must hold it
    /// too.
    #[must_use]
    pub fn change_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.changes)
    }

    /// Whether a rolling deployment currently owns the service.
    #[must_use]
    pub fn is_deploying(&self) -> bool {
        self.deploying.load(Ordering::Acquire)
    }

    /// Snapshot of the active instances.
    pub async fn active_instances(&self) -> Vec<ServiceInstance> {
        self.state.lock().await.active.clone()
    }

    /// Image currently serving.
    pub async fn deployed_image(&self) -> Option<String> {
        self.state.lock().await.image_uri.clone()
    }

    /// Rolls the service onto the image in `descriptor`.
    ///
    /// New instances are probed until all pass the liveness check; only then
    /// are they swapped in and the old set drained. If the gate times out the
    /// active set is left exactly as it was. A second deployment waits for
    /// the first to finish.
    ///
    /// # Errors
    ///
    /// Returns [`StackflowError::HealthGate`] on gate timeout, or a deploy
    /// [`StageFailure`] if the descriptor has no image for the container.
    pub async fn deploy(
        &self,
        descriptor: &DeploymentDescriptor,
    ) -> Result<DeploymentReceipt, StackflowError> {
        let image = descriptor
            .image_for(&self.container)
            .ok_or_else(|| {
                StageFailure::new(
                    PipelineStage::Deploy,
                    format!("descriptor has no image for container '{}'", self.container),
                )
            })?
            .to_string();

        let _change = self.changes.lock().await;
        let mut state = self.state.lock().await;
        let _deploying = DeployingFlag::raise(&self.deploying);
        let desired = state.scaling.policy().clamp(state.count()) as usize;
        FlowEvent::new("deploy.started")
            .add_data("service", serde_json::json!(self.name))
            .add_data("image_uri", serde_json::json!(image))
            .add_data("desired", serde_json::json!(desired))
            .emit_to(self.events.as_ref());
        info!(service = %self.name, image = %image, desired, "Rolling deployment started");

        let candidates: Vec<ServiceInstance> =
            (0..desired).map(|_| state.launch(&self.name, &image)).collect();
        let started = Instant::now();
        let gate = self.health.gate_timeout();
        let mut healthy = vec![false; candidates.len()];
        let mut attempt = 0u32;

        loop {
            for (instance, ok) in candidates.iter().zip(healthy.iter_mut()) {
                if !*ok {
                    *ok = self.probe.check(instance, &self.health.path).await;
                }
            }
            let passed = healthy.iter().filter(|ok| **ok).count();
            if passed == candidates.len() {
                break;
            }

            let waited = started.elapsed();
            if waited >= gate {
                let err = HealthGateTimeout {
                    service: self.name.clone(),
                    healthy: passed,
                    desired: candidates.len(),
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                };
                warn!(
                    service = %self.name,
                    image = %image,
                    error = %err,
                    "Rolling deployment abandoned"
                );
                FlowEvent::new("deploy.failed")
                    .add_data("service", serde_json::json!(self.name))
                    .add_data("image_uri", serde_json::json!(image))
                    .add_data("error", serde_json::json!(err.to_string()))
                    .emit_to(self.events.as_ref());
                return Err(err.into());
            }
            tokio::time::sleep(self.health.poll.delay_for(attempt).min(gate - waited)).await;
            attempt = attempt.saturating_add(1);
        }

        let gate_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let instances: Vec<String> = candidates.iter().map(|i| i.id.clone()).collect();
        let drained = std::mem::replace(&mut state.active, candidates);
        let previous_image = state.image_uri.replace(image.clone());

        info!(
            service = %self.name,
            image = %image,
            drained = drained.len(),
            gate_ms,
            "Rolling deployment finished"
        );
        FlowEvent::new("deploy.finished")
            .add_data("service", serde_json::json!(self.name))
            .add_data("image_uri", serde_json::json!(image))
            .add_data("instances", serde_json::json!(instances))
            .emit_to(self.events.as_ref());

        Ok(DeploymentReceipt {
            service: self.name.clone(),
            image_uri: image,
            previous_image,
            instances,
            gate_ms,
        })
    }

    /// Runs one scaling evaluation against observed CPU utilization.
    ///
    /// Held while a deployment owns the service. Any other holder of the
    /// instance set is waited out.
    pub async fn evaluate_scaling(&self, utilization: f64) -> ScalingDecision {
        if self.is_deploying() {
            return ScalingDecision::Hold(HoldReason::DeploymentInProgress);
        }
        let mut state = self.state.lock().await;
        let Some(image) = state.image_uri.clone() else {
            return ScalingDecision::Hold(HoldReason::Idle);
        };

        let current = state.count();
        let decision = state.scaling.evaluate(current, utilization, Instant::now());
        let target = decision.target(current) as usize;
        while state.active.len() < target {
            let instance = state.launch(&self.name, &image);
            state.active.push(instance);
        }
        state.active.truncate(target);

        if !matches!(decision, ScalingDecision::Hold(_)) {
            FlowEvent::new("scaling.applied")
                .add_data("service", serde_json::json!(self.name))
                .add_data("decision", serde_json::json!(decision))
                .emit_to(self.events.as_ref());
        }
        decision
    }

    /// Replaces instances that fail the liveness check.
    ///
    /// Unhealthy instances are dropped, never repaired. Replacements run the
    /// serving image and never push the count above the cap. Returns the ids
    /// of the dropped instances.
    pub async fn replace_unhealthy(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let Some(image) = state.image_uri.clone() else {
            return Vec::new();
        };

        let mut kept = Vec::with_capacity(state.active.len());
        let mut dropped = Vec::new();
        for instance in std::mem::take(&mut state.active) {
            if self.probe.check(&instance, &self.health.path).await {
                kept.push(instance);
            } else {
                dropped.push(instance.id);
            }
        }

        let cap = state.scaling.policy().max_capacity as usize;
        let replacements = dropped.len().min(cap.saturating_sub(kept.len()));
        for _ in 0..replacements {
            let instance = state.launch(&self.name, &image);
            kept.push(instance);
        }
        state.active = kept;

        if !dropped.is_empty() {
            warn!(
                service = %self.name,
                dropped = ?dropped,
                replacements,
                "Replaced unhealthy instances"
            );
            FlowEvent::new("instances.replaced")
                .add_data("service", serde_json::json!(self.name))
                .add_data("dropped", serde_json::json!(dropped))
                .emit_to(self.events.as_ref());
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::{fast_health, ScriptedHealthProbe};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn service(probe: Arc<ScriptedHealthProbe>) -> ComputeService {
        ComputeService::new("MensajeService", "http://mensaje-lb", probe)
            .with_health(fast_health(Duration::from_millis(60)))
    }

    fn image(uri: &str) -> DeploymentDescriptor {
        DeploymentDescriptor::single(DEFAULT_CONTAINER, uri)
    }

    #[tokio::test]
    async fn test_first_deploy_brings_up_floor() {
        let probe = Arc::new(ScriptedHealthProbe::healthy());
        let svc = service(probe);

        let receipt = svc
            .deploy(&DeploymentDescriptor::single(DEFAULT_CONTAINER, "img:v1"))
            .await
            .unwrap();

        assert_eq!(receipt.previous_image, None);
        assert_eq!(receipt.instances.len(), 1);
        assert_eq!(svc.deployed_image().await.as_deref(), Some("img:v1"));
    }

    #[tokio::test]
    async fn test_gate_timeout_leaves_active_set() {
        let probe = Arc::new(ScriptedHealthProbe::healthy());
        let svc = service(probe.clone());
        svc.deploy(&DeploymentDescriptor::single(DEFAULT_CONTAINER, "img:v1"))
            .await
            .unwrap();
        let before = svc.active_instances().await;

        probe.mark_image_unhealthy("img:v2");
        let err = svc
            .deploy(&DeploymentDescriptor::single(DEFAULT_CONTAINER, "img:v2"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StackflowError::HealthGate(ref e) if e.healthy == 0 && e.desired == 1
        ));
        assert_eq!(svc.active_instances().await, before);
        assert_eq!(svc.deployed_image().await.as_deref(), Some("img:v1"));
    }

    #[tokio::test]
    async fn test_missing_container_is_deploy_failure() {
        let svc = service(Arc::new(ScriptedHealthProbe::healthy()));
        let err = svc
            .deploy(&DeploymentDescriptor::single("OtherContainer", "img:v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StackflowError::Stage(ref f) if f.stage == PipelineStage::Deploy));
    }

    #[tokio::test]
    async fn test_deploy_keeps_scaled_count() {
        let svc = service(Arc::new(ScriptedHealthProbe::healthy()));
        svc.deploy(&DeploymentDescriptor::single(DEFAULT_CONTAINER, "img:v1"))
            .await
            .unwrap();
        assert_eq!(
            svc.evaluate_scaling(100.0).await,
            ScalingDecision::ScaleOut { from: 1, to: 2 }
        );

        let receipt = svc
            .deploy(&DeploymentDescriptor::single(DEFAULT_CONTAINER, "img:v2"))
            .await
            .unwrap();
        assert_eq!(receipt.instances.len(), 2);
        assert_eq!(receipt.previous_image.as_deref(), Some("img:v1"));
        assert!(svc
            .active_instances()
            .await
            .iter()
            .all(|i| i.image_uri == "img:v2"));
    }

    #[tokio::test]
    async fn test_scaling_idle_before_first_deploy() {
        let svc = service(Arc::new(ScriptedHealthProbe::healthy()));
        assert_eq!(svc.evaluate_scaling(99.0).await, ScalingDecision::Hold(HoldReason::Idle));
    }

    #[tokio::test]
    async fn test_scaling_held_during_deploy() {
        let probe = Arc::new(ScriptedHealthProbe::healthy().with_delay(Duration::from_millis(40)));
        let svc = Arc::new(service(probe));

        let deploying = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.deploy(&DeploymentDescriptor::single(DEFAULT_CONTAINER, "img:v1"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            svc.evaluate_scaling(99.0).await,
            ScalingDecision::Hold(HoldReason::DeploymentInProgress)
        );
        deploying.await.unwrap().unwrap();
        assert!(!svc.is_deploying());
    }

    #[tokio::test]
    async fn test_scaling_waits_out_snapshot_holder() {
        let svc = Arc::new(service(Arc::new(ScriptedHealthProbe::healthy())));
        svc.deploy(&image("img:v1")).await.unwrap();

        let snapshot = svc.state.lock().await;
        let scaling = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.evaluate_scaling(100.0).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(snapshot);

        assert_eq!(scaling.await.unwrap(), ScalingDecision::ScaleOut { from: 1, to: 2 });
        assert_eq!(svc.active_instances().await.len(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_deploy_releases_scaling() {
        let liveness = Arc::new(ScriptedHealthProbe::healthy());
        let svc = service(liveness.clone());
        svc.deploy(&image("img:v1")).await.unwrap();

        liveness.mark_image_unhealthy("img:v2");
        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), svc.deploy(&image("img:v2"))).await;

        assert!(abandoned.is_err());
        assert!(!svc.is_deploying());
        assert_eq!(
            svc.evaluate_scaling(100.0).await,
            ScalingDecision::ScaleOut { from: 1, to: 2 }
        );
        assert_eq!(svc.deployed_image().await.as_deref(), Some("img:v1"));
    }

    #[tokio::test]
    async fn test_deploy_waits_for_change_lock() {
        let svc = Arc::new(service(Arc::new(ScriptedHealthProbe::healthy())));
        let update = svc.change_lock().lock_owned().await;

        let deploying = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.deploy(&image("img:v1")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!deploying.is_finished());
        assert_eq!(svc.deployed_image().await, None);

        drop(update);
        deploying.await.unwrap().unwrap();
        assert_eq!(svc.deployed_image().await.as_deref(), Some("img:v1"));
    }

    #[tokio::test]
    async fn test_replace_unhealthy_respects_cap() {
        let probe = Arc::new(ScriptedHealthProbe::healthy());
        let events = Arc::new(CollectingEventSink::new());
        let svc = service(probe.clone())
            .with_scaling(ScalingPolicy::default().with_capacity(1, 2))
            .with_events(events.clone());
        svc.deploy(&DeploymentDescriptor::single(DEFAULT_CONTAINER, "img:v1"))
            .await
            .unwrap();
        svc.evaluate_scaling(100.0).await;
        let active = svc.active_instances().await;
        assert_eq!(active.len(), 2);

        probe.mark_instance_unhealthy(&active[0].id);
        let dropped = svc.replace_unhealthy().await;

        assert_eq!(dropped, vec![active[0].id.clone()]);
        let after = svc.active_instances().await;
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|i| i.id != active[0].id));
        assert_eq!(events.events_of_type("instances.replaced").len(), 1);
    }
}
