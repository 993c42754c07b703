//! Walks a topology graph, provisioning or tearing down units in dependency order.
//!
//! Independent units run concurrently: a unit is launched as soon as every
//! unit it waits on has settled, the same way stages are scheduled in a DAG.

use super::{ResourceDeclaration, ResolvedInputs, TopologyGraph, UnitOutputs};
use crate::core::{FlowEvent, UnitState};
use crate::errors::{DefinitionError, ProvisioningError, StackflowError};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::unit_span;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument};

/// Everything the control plane needs to create or update one unit.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionRequest {
    /// Unit name.
    pub unit: String,
    /// Target region.
    pub region: String,
    /// Resource declarations rendered against resolved inputs.
    pub declarations: Vec<ResourceDeclaration>,
    /// Output keys the unit must report back.
    pub expected_outputs: Vec<String>,
    /// Graph version the request was issued against.
    pub graph_version: u64,
}

/// The external control plane that actually creates resources.
///
/// Both operations must be idempotent: applying the same request twice, or
/// destroying an absent unit, succeeds.
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    /// Creates or updates the resources of a unit and returns its outputs.
    async fn apply(&self, request: &ProvisionRequest) -> anyhow::Result<UnitOutputs>;

    /// Deletes every resource of a unit.
    async fn destroy(&self, unit: &str, region: &str) -> anyhow::Result<()>;
}

/// Outcome of walking a topology.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisionReport {
    /// Units that changed state successfully, in completion order.
    pub completed: Vec<String>,
    /// Units already in the target state.
    pub unchanged: Vec<String>,
    /// Units that failed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Units not attempted because a unit they wait on failed.
    pub skipped: Vec<String>,
    /// Wall-clock time of the walk in milliseconds.
    pub duration_ms: f64,
}

impl ProvisionReport {
    /// True when every unit reached the target state.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Provision,
    Destroy,
}

type UnitFuture = BoxFuture<'static, (String, anyhow::Result<UnitOutputs>)>;

/// Drives a [`TopologyGraph`] through a [`ResourceProvisioner`].
pub struct Orchestrator {
    provisioner: Arc<dyn ResourceProvisioner>,
    events: Arc<dyn EventSink>,
    exclusive: HashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("exclusive", &self.exclusive.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator that discards events.
    #[must_use]
    pub fn new(provisioner: Arc<dyn ResourceProvisioner>) -> Self {
        Self {
            provisioner,
            events: Arc::new(NoOpEventSink),
            exclusive: HashMap::new(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Guards every control-plane change of `unit` with `lock`.
    ///
    /// Provisioning, updating and destroying the unit wait for the lock and
    /// hold it until the control plane answers. Pass the
    /// [`ComputeService::change_lock`](crate::compute::ComputeService::change_lock)
    /// of the service the unit runs, so updates never overlap a deployment.
    #[must_use]
    pub fn with_exclusive_unit(mut self, unit: impl Into<String>, lock: Arc<Mutex<()>>) -> Self {
        self.exclusive.insert(unit.into(), lock);
        self
    }

    /// Provisions every unit not yet provisioned.
    ///
    /// Definition errors abort before anything is created. Per-unit failures
    /// are collected in the report and stop the failed unit's dependents.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] if the graph is invalid.
    pub async fn provision(
        &self,
        graph: &mut TopologyGraph,
    ) -> Result<ProvisionReport, StackflowError> {
        let order = graph.validate()?;
        info!(
            topology = %graph.name(),
            version = graph.version(),
            units = order.len(),
            "Provisioning topology"
        );
        Ok(self.walk(graph, order, Direction::Provision).await)
    }

    /// Tears down every live unit, dependents first.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] if the graph contains a cycle.
    pub async fn destroy(
        &self,
        graph: &mut TopologyGraph,
    ) -> Result<ProvisionReport, StackflowError> {
        let order = graph
            .teardown_order()
            .map_err(DefinitionError::from)?;
        info!(topology = %graph.name(), units = order.len(), "Destroying topology");
        Ok(self.walk(graph, order, Direction::Destroy).await)
    }

    /// Re-applies a provisioned unit and refreshes its outputs.
    ///
    /// # Errors
    ///
    /// Fails if the unit is not provisioned, a dependency is not provisioned,
    /// or the control plane rejects the update (the unit is then `Failed`).
    pub async fn update(
        &self,
        graph: &mut TopologyGraph,
        unit: &str,
    ) -> Result<UnitOutputs, StackflowError> {
        let exclusion = self.exclusion(unit);
        let _lease = match &exclusion {
            Some(lock) => Some(Self::lease(lock, unit).await),
            None => None,
        };
        let inputs = graph.begin_update(unit)?;
        self.transitioned(unit, UnitState::Provisioned, UnitState::Updating);

        let request = match Self::request_for(graph, unit, &inputs) {
            Ok(request) => request,
            Err(e) => {
                self.mark_failed(graph, unit, UnitState::Updating, &e.to_string());
                return Err(e.into());
            }
        };

        match self.provisioner.apply(&request).await {
            Ok(outputs) => {
                if let Err(e) = graph.complete_provisioning(unit, outputs.clone()) {
                    self.transitioned(unit, UnitState::Updating, UnitState::Failed);
                    return Err(e);
                }
                self.transitioned(unit, UnitState::Updating, UnitState::Provisioned);
                info!(unit = %unit, "Unit updated");
                Ok(outputs)
            }
            Err(e) => {
                let reason = format!("{e:#}");
                self.mark_failed(graph, unit, UnitState::Updating, &reason);
                Err(ProvisioningError::new(unit, "update", reason).into())
            }
        }
    }

    async fn walk(
        &self,
        graph: &mut TopologyGraph,
        order: Vec<String>,
        direction: Direction,
    ) -> ProvisionReport {
        let start = Instant::now();
        let mut report = ProvisionReport::default();
        let mut settled: HashSet<String> = HashSet::new();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut launched: HashSet<String> = HashSet::new();
        let mut active: FuturesUnordered<UnitFuture> = FuturesUnordered::new();

        for name in &order {
            let state = graph.state(name).unwrap_or_default();
            let done = match direction {
                Direction::Provision => state == UnitState::Provisioned,
                Direction::Destroy => state.is_absent(),
            };
            if done {
                report.unchanged.push(name.clone());
                settled.insert(name.clone());
            }
        }

        loop {
            for name in &order {
                if settled.contains(name) || blocked.contains(name) || launched.contains(name) {
                    continue;
                }
                let waits_on: Vec<String> = match direction {
                    Direction::Provision => graph
                        .dependencies_of(name)
                        .map(<[String]>::to_vec)
                        .unwrap_or_default(),
                    Direction::Destroy => graph
                        .dependents_of(name)
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                };

                if let Some(cause) = waits_on.iter().find(|w| blocked.contains(*w)) {
                    warn!(unit = %name, blocked_by = %cause, "Skipping unit");
                    blocked.insert(name.clone());
                    report.skipped.push(name.clone());
                    continue;
                }
                if !waits_on.iter().all(|w| settled.contains(w)) {
                    continue;
                }

                let launch = match direction {
                    Direction::Provision => self.launch_provision(graph, name),
                    Direction::Destroy => self.launch_destroy(graph, name),
                };
                match launch {
                    Ok(future) => {
                        launched.insert(name.clone());
                        active.push(future);
                    }
                    Err(e) => {
                        warn!(unit = %name, error = %e, "Unit could not start");
                        blocked.insert(name.clone());
                        report.failed.push((name.clone(), e.to_string()));
                    }
                }
            }

            let Some((name, result)) = active.next().await else {
                break;
            };

            let finished = match (direction, result) {
                (Direction::Provision, Ok(outputs)) => graph
                    .complete_provisioning(&name, outputs)
                    .map(|()| (UnitState::Provisioning, UnitState::Provisioned))
                    .map_err(|e| (UnitState::Provisioning, e.to_string(), true)),
                (Direction::Destroy, Ok(_)) => graph
                    .complete_destroying(&name)
                    .map(|()| (UnitState::Destroying, UnitState::Destroyed))
                    .map_err(|e| (UnitState::Destroying, e.to_string(), false)),
                (Direction::Provision, Err(e)) => {
                    Err((UnitState::Provisioning, format!("{e:#}"), false))
                }
                (Direction::Destroy, Err(e)) => {
                    Err((UnitState::Destroying, format!("{e:#}"), false))
                }
            };

            match finished {
                Ok((from, to)) => {
                    self.transitioned(&name, from, to);
                    info!(unit = %name, state = %to, "Unit settled");
                    settled.insert(name.clone());
                    report.completed.push(name);
                }
                Err((from, reason, already_failed)) => {
                    if already_failed {
                        self.transitioned(&name, from, UnitState::Failed);
                    } else {
                        self.mark_failed(graph, &name, from, &reason);
                    }
                    warn!(unit = %name, error = %reason, "Unit failed");
                    blocked.insert(name.clone());
                    report.failed.push((name, reason));
                }
            }
        }

        report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            completed = report.completed.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            duration_ms = report.duration_ms,
            "Topology walk finished"
        );
        report
    }

    fn launch_provision(
        &self,
        graph: &mut TopologyGraph,
        name: &str,
    ) -> Result<UnitFuture, StackflowError> {
        let from = graph.state(name).unwrap_or_default();
        let inputs = graph.begin_provisioning(name)?;
        self.transitioned(name, from, UnitState::Provisioning);

        let request = match Self::request_for(graph, name, &inputs) {
            Ok(request) => request,
            Err(e) => {
                self.mark_failed(graph, name, UnitState::Provisioning, &e.to_string());
                return Err(e.into());
            }
        };

        let provisioner = Arc::clone(&self.provisioner);
        let exclusion = self.exclusion(name);
        let span = unit_span(name, "provision");
        Ok(Box::pin(
            async move {
                let _lease = match &exclusion {
                    Some(lock) => Some(Self::lease(lock, &request.unit).await),
                    None => None,
                };
                let result = provisioner.apply(&request).await;
                (request.unit, result)
            }
            .instrument(span),
        ))
    }

    fn launch_destroy(
        &self,
        graph: &mut TopologyGraph,
        name: &str,
    ) -> Result<UnitFuture, StackflowError> {
        let from = graph.state(name).unwrap_or_default();
        let region = graph
            .unit(name)
            .map(|u| u.region().to_string())
            .ok_or_else(|| DefinitionError::unknown_unit(name))?;
        graph.begin_destroying(name)?;
        self.transitioned(name, from, UnitState::Destroying);

        let provisioner = Arc::clone(&self.provisioner);
        let exclusion = self.exclusion(name);
        let unit = name.to_string();
        let span = unit_span(name, "destroy");
        Ok(Box::pin(
            async move {
                let _lease = match &exclusion {
                    Some(lock) => Some(Self::lease(lock, &unit).await),
                    None => None,
                };
                let result = provisioner
                    .destroy(&unit, &region)
                    .await
                    .map(|()| UnitOutputs::new());
                (unit, result)
            }
            .instrument(span),
        ))
    }

    fn exclusion(&self, unit: &str) -> Option<Arc<Mutex<()>>> {
        self.exclusive.get(unit).map(Arc::clone)
    }

    async fn lease<'a>(lock: &'a Mutex<()>, unit: &str) -> tokio::sync::MutexGuard<'a, ()> {
        if let Ok(guard) = lock.try_lock() {
            return guard;
        }
        debug!(unit = %unit, "Waiting for exclusive change of unit");
        lock.lock().await
    }

    fn request_for(
        graph: &TopologyGraph,
        name: &str,
        inputs: &ResolvedInputs,
    ) -> Result<ProvisionRequest, DefinitionError> {
        let unit = graph
            .unit(name)
            .ok_or_else(|| DefinitionError::unknown_unit(name))?;
        Ok(ProvisionRequest {
            unit: name.to_string(),
            region: unit.region().to_string(),
            declarations: unit.declarations(inputs)?,
            expected_outputs: unit.produces(),
            graph_version: graph.version(),
        })
    }

    fn mark_failed(&self, graph: &mut TopologyGraph, name: &str, from: UnitState, reason: &str) {
        match graph.fail(name, reason) {
            Ok(()) => self.transitioned(name, from, UnitState::Failed),
            Err(e) => warn!(unit = %name, error = %e, "Could not record unit failure"),
        }
    }

    fn transitioned(&self, name: &str, from: UnitState, to: UnitState) {
        FlowEvent::unit_transition(name, from, to).emit_to(self.events.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::{InMemoryProvisioner, StaticUnit};
    use pretty_assertions::assert_eq;

    fn scenario_a() -> TopologyGraph {
        let mut graph = TopologyGraph::new("scenario-a");
        graph
            .add_unit(Arc::new(StaticUnit::new("TableStore").producing(&["table.mensajes"])))
            .unwrap();
        graph
            .add_unit(Arc::new(
                StaticUnit::new("ImageRegistry").producing(&["registry.identifier"]),
            ))
            .unwrap();
        graph
            .add_unit(Arc::new(
                StaticUnit::new("ComputeService")
                    .consuming(&["table.mensajes", "registry.identifier"])
                    .producing(&["service.endpoint"]),
            ))
            .unwrap();
        graph
            .add_unit(Arc::new(
                StaticUnit::new("ReleasePipeline")
                    .consuming(&["service.endpoint", "registry.identifier"]),
            ))
            .unwrap();
        graph.add_dependency("ComputeService", "TableStore").unwrap();
        graph.add_dependency("ComputeService", "ImageRegistry").unwrap();
        graph.add_dependency("ReleasePipeline", "ComputeService").unwrap();
        graph
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[tokio::test]
    async fn test_provision_in_dependency_order() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let events = Arc::new(CollectingEventSink::new());
        let orchestrator = Orchestrator::new(provisioner.clone()).with_events(events.clone());
        let mut graph = scenario_a();

        let report = orchestrator.provision(&mut graph).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.completed.len(), 4);
        let applied = provisioner.applied();
        assert!(position(&applied, "TableStore") < position(&applied, "ComputeService"));
        assert!(position(&applied, "ImageRegistry") < position(&applied, "ComputeService"));
        assert!(position(&applied, "ComputeService") < position(&applied, "ReleasePipeline"));
        assert_eq!(graph.state("ReleasePipeline"), Some(UnitState::Provisioned));
        assert_eq!(events.events_of_type("unit.provisioned").len(), 4);
    }

    #[tokio::test]
    async fn test_outputs_threaded_into_requests() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let orchestrator = Orchestrator::new(provisioner.clone());
        let mut graph = scenario_a();

        orchestrator.provision(&mut graph).await.unwrap();

        let request = provisioner.last_request("ReleasePipeline").unwrap();
        let rendered = serde_json::to_string(&request.declarations).unwrap();
        assert!(rendered.contains("ComputeService-service.endpoint"));
        assert_eq!(request.graph_version, graph.version());
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let provisioner = Arc::new(InMemoryProvisioner::new().failing_on("TableStore"));
        let orchestrator = Orchestrator::new(provisioner.clone());
        let mut graph = scenario_a();

        let report = orchestrator.provision(&mut graph).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "TableStore");
        assert_eq!(report.skipped, vec!["ComputeService", "ReleasePipeline"]);
        assert_eq!(graph.state("ImageRegistry"), Some(UnitState::Provisioned));
        assert_eq!(graph.state("TableStore"), Some(UnitState::Failed));
        assert_eq!(graph.state("ComputeService"), Some(UnitState::Declared));
    }

    #[tokio::test]
    async fn test_retry_after_failure_resumes() {
        let provisioner = Arc::new(InMemoryProvisioner::new().failing_on("TableStore"));
        let orchestrator = Orchestrator::new(provisioner.clone());
        let mut graph = scenario_a();
        orchestrator.provision(&mut graph).await.unwrap();

        provisioner.clear_failures();
        let report = orchestrator.provision(&mut graph).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.unchanged, vec!["ImageRegistry"]);
        assert_eq!(report.completed.len(), 3);
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_provisioning() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let orchestrator = Orchestrator::new(provisioner.clone());
        let mut graph = scenario_a();
        graph.add_dependency("TableStore", "ReleasePipeline").unwrap();

        let err = orchestrator.provision(&mut graph).await.unwrap_err();

        assert!(err.is_definition_error());
        assert!(provisioner.applied().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_reverse_order() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let orchestrator = Orchestrator::new(provisioner.clone());
        let mut graph = scenario_a();
        orchestrator.provision(&mut graph).await.unwrap();

        let report = orchestrator.destroy(&mut graph).await.unwrap();

        assert!(report.is_success());
        let destroyed = provisioner.destroyed();
        assert_eq!(destroyed[0], "ReleasePipeline");
        assert_eq!(destroyed[1], "ComputeService");
        for name in graph.unit_names() {
            assert_eq!(graph.state(name), Some(UnitState::Destroyed));
        }
    }

    #[tokio::test]
    async fn test_update_refreshes_outputs() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let orchestrator = Orchestrator::new(provisioner.clone());
        let mut graph = scenario_a();
        orchestrator.provision(&mut graph).await.unwrap();

        provisioner.set_output("ComputeService", "service.endpoint", "http://lb-2");
        let outputs = orchestrator.update(&mut graph, "ComputeService").await.unwrap();

        assert_eq!(outputs.get("service.endpoint"), Some("http://lb-2"));
        assert_eq!(
            graph.outputs("ComputeService").unwrap().get("service.endpoint"),
            Some("http://lb-2")
        );
    }

    #[tokio::test]
    async fn test_update_of_exclusive_unit_waits_for_lock() {
        let lock = Arc::new(Mutex::new(()));
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let orchestrator = Orchestrator::new(provisioner.clone())
            .with_exclusive_unit("ComputeService", Arc::clone(&lock));
        let mut graph = scenario_a();
        orchestrator.provision(&mut graph).await.unwrap();

        let held = Arc::clone(&lock).lock_owned().await;
        let release = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            drop(held);
        });
        let started = Instant::now();
        orchestrator.update(&mut graph, "ComputeService").await.unwrap();

        assert!(started.elapsed() >= std::time::Duration::from_millis(30));
        assert_eq!(graph.state("ComputeService"), Some(UnitState::Provisioned));
        release.await.unwrap();
    }

    #[tokio::test]
    async fn test_other_units_ignore_exclusive_lock() {
        let lock = Arc::new(Mutex::new(()));
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let orchestrator = Orchestrator::new(provisioner.clone())
            .with_exclusive_unit("ComputeService", Arc::clone(&lock));
        let mut graph = scenario_a();
        orchestrator.provision(&mut graph).await.unwrap();

        let _held = lock.lock().await;
        let outputs = orchestrator.update(&mut graph, "TableStore").await.unwrap();

        assert!(outputs.get("table.mensajes").is_some());
    }

    #[tokio::test]
    async fn test_update_requires_provisioned_unit() {
        let orchestrator = Orchestrator::new(Arc::new(InMemoryProvisioner::new()));
        let mut graph = scenario_a();

        let err = orchestrator.update(&mut graph, "TableStore").await.unwrap_err();
        assert!(matches!(err, StackflowError::Lifecycle(_)));
    }
}
