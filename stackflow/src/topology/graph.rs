//! The topology graph: resource units plus depends-on edges.

use super::{ResolvedInputs, ResourceUnit, UnitLifecycle, UnitOutputs};
use crate::core::UnitState;
use crate::errors::{CycleError, DefinitionError, ProvisioningError, StackflowError};
use crate::utils::validate_unit_name;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug)]
struct UnitNode {
    unit: Arc<dyn ResourceUnit>,
    dependencies: Vec<String>,
    lifecycle: UnitLifecycle,
}

/// A directed acyclic graph of resource units.
///
/// The graph is an explicit value passed to the orchestrator. Its `version`
/// increases with every structural change so callers can tell which
/// definition a provisioning request was issued against.
#[derive(Debug)]
pub struct TopologyGraph {
    name: String,
    version: u64,
    nodes: HashMap<String, UnitNode>,
    declaration_order: Vec<String>,
}

impl TopologyGraph {
    /// Creates an empty topology.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            nodes: HashMap::new(),
            declaration_order: Vec::new(),
        }
    }

    /// Returns the topology name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the definition version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the number of units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no units were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Unit names in declaration order.
    #[must_use]
    pub fn unit_names(&self) -> &[String] {
        &self.declaration_order
    }

    /// Adds a unit in the `Declared` state.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already taken.
    pub fn add_unit(&mut self, unit: Arc<dyn ResourceUnit>) -> Result<(), DefinitionError> {
        let name = unit.name().to_string();
        validate_unit_name(&name)?;
        if self.nodes.contains_key(&name) {
            return Err(DefinitionError::DuplicateUnit { unit: name });
        }

        tracing::debug!(
            topology = %self.name,
            unit = %name,
            region = %unit.region(),
            "Declared unit"
        );
        self.declaration_order.push(name.clone());
        self.nodes.insert(
            name,
            UnitNode {
                unit,
                dependencies: Vec::new(),
                lifecycle: UnitLifecycle::new(),
            },
        );
        self.version += 1;
        Ok(())
    }

    /// Declares that `dependent` depends on `dependency`.
    ///
    /// Repeating an existing edge is a no-op. Cycles are not rejected here;
    /// they surface from [`Self::resolve_order`].
    ///
    /// # Errors
    ///
    /// Returns an error if either unit is unknown or the edge is a self-edge.
    pub fn add_dependency(
        &mut self,
        dependent: &str,
        dependency: &str,
    ) -> Result<(), DefinitionError> {
        if dependent == dependency {
            return Err(DefinitionError::SelfDependency {
                unit: dependent.to_string(),
            });
        }
        if !self.nodes.contains_key(dependency) {
            return Err(DefinitionError::unknown_unit(dependency));
        }
        let node = self
            .nodes
            .get_mut(dependent)
            .ok_or_else(|| DefinitionError::unknown_unit(dependent))?;

        if !node.dependencies.iter().any(|d| d == dependency) {
            node.dependencies.push(dependency.to_string());
            self.version += 1;
        }
        Ok(())
    }

    /// Returns a unit by name.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&Arc<dyn ResourceUnit>> {
        self.nodes.get(name).map(|n| &n.unit)
    }

    /// Direct dependencies of a unit, in the order the edges were declared.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.nodes.get(name).map(|n| n.dependencies.as_slice())
    }

    /// Direct dependents of a unit, in declaration order.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.declaration_order
            .iter()
            .filter(|candidate| {
                self.nodes[candidate.as_str()]
                    .dependencies
                    .iter()
                    .any(|d| d == name)
            })
            .map(String::as_str)
            .collect()
    }

    /// All units reachable through depends-on edges, in declaration order.
    #[must_use]
    pub fn transitive_dependencies(&self, name: &str) -> Vec<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![name];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                for dep in &node.dependencies {
                    if dep != name && seen.insert(dep.as_str()) {
                        stack.push(dep.as_str());
                    }
                }
            }
        }
        self.declaration_order
            .iter()
            .map(String::as_str)
            .filter(|n| seen.contains(n))
            .collect()
    }

    /// Computes the provisioning order.
    ///
    /// Every unit appears after all of its dependencies. Among units whose
    /// dependencies are already placed, the one declared first goes next, so
    /// the order is reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] if the edges contain a cycle. No partial order
    /// is returned in that case.
    pub fn resolve_order(&self) -> Result<Vec<String>, CycleError> {
        let mut remaining: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(name, node)| (name.as_str(), node.dependencies.len()))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(next) = self
            .declaration_order
            .iter()
            .find(|n| remaining.get(n.as_str()) == Some(&0))
        {
            remaining.remove(next.as_str());
            for dependent in self.dependents_of(next) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                }
            }
            order.push(next.clone());
        }

        if remaining.is_empty() {
            Ok(order)
        } else {
            Err(self.find_cycle(&remaining))
        }
    }

    /// Teardown order: the reverse of [`Self::resolve_order`].
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] if the edges contain a cycle.
    pub fn teardown_order(&self) -> Result<Vec<String>, CycleError> {
        let mut order = self.resolve_order()?;
        order.reverse();
        Ok(order)
    }

    // Every unplaced unit still has an unplaced dependency, so following
    // those edges from any of them must revisit a unit.
    fn find_cycle(&self, unplaced: &HashMap<&str, usize>) -> CycleError {
        let Some(start) = self
            .declaration_order
            .iter()
            .find(|n| unplaced.contains_key(n.as_str()))
        else {
            return CycleError::new(Vec::new());
        };

        let mut path: Vec<String> = vec![start.clone()];
        loop {
            let current = &self.nodes[path[path.len() - 1].as_str()];
            let Some(next) = current
                .dependencies
                .iter()
                .find(|d| unplaced.contains_key(d.as_str()))
            else {
                return CycleError::new(path);
            };
            if let Some(pos) = path.iter().position(|n| n == next) {
                let mut cycle = path.split_off(pos);
                cycle.push(next.clone());
                return CycleError::new(cycle);
            }
            path.push(next.clone());
        }
    }

    /// Checks the whole definition before anything is provisioned.
    ///
    /// Verifies the edges are acyclic and that every key a unit consumes is
    /// produced by one of its (transitive) dependencies. Returns the
    /// provisioning order.
    ///
    /// # Errors
    ///
    /// Returns the first [`DefinitionError`] found.
    pub fn validate(&self) -> Result<Vec<String>, DefinitionError> {
        let order = self.resolve_order()?;
        for name in &order {
            let node = &self.nodes[name.as_str()];
            let available: HashSet<String> = self
                .transitive_dependencies(name)
                .into_iter()
                .flat_map(|dep| self.nodes[dep].unit.produces())
                .collect();
            let missing = node.unit.consumes().into_iter().find(|k| !available.contains(k));
            if let Some(missing) = missing {
                return Err(DefinitionError::unresolved_input(name, missing));
            }
        }
        Ok(order)
    }

    /// Current lifecycle state of a unit.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<UnitState> {
        self.nodes.get(name).map(|n| n.lifecycle.state())
    }

    /// Lifecycle record of a unit.
    #[must_use]
    pub fn lifecycle(&self, name: &str) -> Option<&UnitLifecycle> {
        self.nodes.get(name).map(|n| &n.lifecycle)
    }

    /// Outputs of a unit; `None` unless it is provisioned.
    #[must_use]
    pub fn outputs(&self, name: &str) -> Option<&UnitOutputs> {
        self.nodes.get(name).and_then(|n| n.lifecycle.outputs())
    }

    /// Collects the outputs of every dependency of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::UnresolvedDependency`] if any dependency is
    /// not provisioned.
    pub fn resolve_inputs(&self, name: &str) -> Result<ResolvedInputs, DefinitionError> {
        if !self.nodes.contains_key(name) {
            return Err(DefinitionError::unknown_unit(name));
        }
        let mut inputs = ResolvedInputs::new(name);
        for dep in self.transitive_dependencies(name) {
            let lifecycle = &self.nodes[dep].lifecycle;
            let outputs = lifecycle
                .outputs()
                .ok_or_else(|| DefinitionError::UnresolvedDependency {
                    unit: name.to_string(),
                    dependency: dep.to_string(),
                    state: lifecycle.state(),
                })?;
            inputs = inputs.with_dependency(dep, outputs.clone());
        }
        Ok(inputs)
    }

    fn node_mut(&mut self, name: &str) -> Result<&mut UnitNode, DefinitionError> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| DefinitionError::unknown_unit(name))
    }

    /// Gates and starts provisioning of a unit.
    ///
    /// # Errors
    ///
    /// Fails if a dependency is not provisioned or the unit cannot start.
    pub fn begin_provisioning(&mut self, name: &str) -> Result<ResolvedInputs, StackflowError> {
        let inputs = self.resolve_inputs(name)?;
        self.node_mut(name)?
            .lifecycle
            .transition(name, UnitState::Provisioning)?;
        Ok(inputs)
    }

    /// Gates and starts an update of a provisioned unit.
    ///
    /// # Errors
    ///
    /// Fails if a dependency is not provisioned or the unit is not provisioned.
    pub fn begin_update(&mut self, name: &str) -> Result<ResolvedInputs, StackflowError> {
        let inputs = self.resolve_inputs(name)?;
        self.node_mut(name)?
            .lifecycle
            .transition(name, UnitState::Updating)?;
        Ok(inputs)
    }

    /// Commits outputs of a provisioning or update.
    ///
    /// If the control plane did not return every key the unit produces, the
    /// unit is marked failed instead.
    ///
    /// # Errors
    ///
    /// Returns a [`ProvisioningError`] for missing outputs, or a lifecycle
    /// error if the unit was not in flight.
    pub fn complete_provisioning(
        &mut self,
        name: &str,
        outputs: UnitOutputs,
    ) -> Result<(), StackflowError> {
        let node = self.node_mut(name)?;
        let missing: Vec<String> = node
            .unit
            .produces()
            .into_iter()
            .filter(|k| !outputs.contains_key(k))
            .collect();

        if missing.is_empty() {
            node.lifecycle.complete(name, outputs)?;
            Ok(())
        } else {
            let reason = format!("missing outputs: {}", missing.join(", "));
            node.lifecycle.fail(name, reason.clone())?;
            Err(ProvisioningError::new(name, "provision", reason).into())
        }
    }

    /// Marks a unit in flight as failed.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error if the unit was not in flight.
    pub fn fail(&mut self, name: &str, reason: impl Into<String>) -> Result<(), StackflowError> {
        self.node_mut(name)?.lifecycle.fail(name, reason)?;
        Ok(())
    }

    /// Gates and starts teardown of a unit.
    ///
    /// # Errors
    ///
    /// Fails if any dependent still holds resources.
    pub fn begin_destroying(&mut self, name: &str) -> Result<(), StackflowError> {
        let live: Vec<String> = self
            .dependents_of(name)
            .into_iter()
            .filter(|d| !self.nodes[*d].lifecycle.state().is_absent())
            .map(str::to_string)
            .collect();
        if !live.is_empty() {
            return Err(StackflowError::DependentsAlive {
                unit: name.to_string(),
                dependents: live,
            });
        }
        self.node_mut(name)?
            .lifecycle
            .transition(name, UnitState::Destroying)?;
        Ok(())
    }

    /// Finishes teardown of a unit.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error if the unit was not being destroyed.
    pub fn complete_destroying(&mut self, name: &str) -> Result<(), StackflowError> {
        self.node_mut(name)?
            .lifecycle
            .transition(name, UnitState::Destroyed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticUnit;
    use pretty_assertions::assert_eq;

    fn graph_of(names: &[&str], edges: &[(&str, &str)]) -> TopologyGraph {
        let mut graph = TopologyGraph::new("test");
        for name in names {
            graph.add_unit(Arc::new(StaticUnit::new(*name))).unwrap();
        }
        for (a, b) in edges {
            graph.add_dependency(a, b).unwrap();
        }
        graph
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_scenario_a_order() {
        let graph = graph_of(
            &["TableStore", "ImageRegistry", "ComputeService", "ReleasePipeline"],
            &[
                ("ComputeService", "TableStore"),
                ("ComputeService", "ImageRegistry"),
                ("ReleasePipeline", "ComputeService"),
            ],
        );

        let order = graph.resolve_order().unwrap();
        assert!(position(&order, "TableStore") < position(&order, "ComputeService"));
        assert!(position(&order, "ImageRegistry") < position(&order, "ComputeService"));
        assert!(position(&order, "ComputeService") < position(&order, "ReleasePipeline"));
    }

    #[test]
    fn test_tie_break_is_declaration_order() {
        let graph = graph_of(&["c", "a", "b"], &[]);
        assert_eq!(graph.resolve_order().unwrap(), vec!["c", "a", "b"]);

        // A later-declared unit with no dependencies still waits its turn.
        let graph = graph_of(&["x", "y", "z"], &[("x", "z")]);
        assert_eq!(graph.resolve_order().unwrap(), vec!["y", "z", "x"]);
    }

    #[test]
    fn test_scenario_d_two_unit_cycle() {
        let graph = graph_of(&["A", "B"], &[("A", "B"), ("B", "A")]);

        let err = graph.resolve_order().unwrap_err();
        assert_eq!(err.cycle_path, vec!["A", "B", "A"]);
        assert_eq!(err.offending_edge(), Some(("A", "B")));
        assert!(matches!(graph.validate(), Err(DefinitionError::Cycle(_))));
    }

    #[test]
    fn test_cycle_behind_acyclic_prefix() {
        let graph = graph_of(
            &["root", "a", "b", "c"],
            &[("a", "root"), ("a", "c"), ("b", "a"), ("c", "b")],
        );
        let err = graph.resolve_order().unwrap_err();
        assert_eq!(err.cycle_path, vec!["a", "c", "b", "a"]);
        assert!(graph.teardown_order().is_err());
    }

    #[test]
    fn test_every_unit_after_its_dependencies() {
        // A layered DAG with edges declared in scrambled order.
        let names: Vec<String> = (0..12).map(|i| format!("u{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut edges = Vec::new();
        for i in 0..12usize {
            for j in 0..i {
                if (i * 7 + j * 3) % 4 == 0 {
                    edges.push((refs[i], refs[j]));
                }
            }
        }
        let graph = graph_of(&refs, &edges);

        let order = graph.resolve_order().unwrap();
        assert_eq!(order.len(), 12);
        for (dependent, dependency) in edges {
            assert!(position(&order, dependency) < position(&order, dependent));
        }
    }

    #[test]
    fn test_add_dependency_errors() {
        let mut graph = graph_of(&["a", "b"], &[]);
        assert_eq!(
            graph.add_dependency("a", "a"),
            Err(DefinitionError::SelfDependency { unit: "a".into() })
        );
        assert_eq!(
            graph.add_dependency("a", "missing"),
            Err(DefinitionError::unknown_unit("missing"))
        );
        assert!(graph.add_unit(Arc::new(StaticUnit::new("a"))).is_err());
        assert!(graph.add_unit(Arc::new(StaticUnit::new("bad_name"))).is_err());
    }

    #[test]
    fn test_version_tracks_structure() {
        let mut graph = graph_of(&["a", "b"], &[]);
        assert_eq!(graph.version(), 2);
        graph.add_dependency("a", "b").unwrap();
        graph.add_dependency("a", "b").unwrap();
        assert_eq!(graph.version(), 3);
    }

    #[test]
    fn test_validate_unresolved_input() {
        let mut graph = TopologyGraph::new("t");
        graph
            .add_unit(Arc::new(StaticUnit::new("tables").producing(&["table.mensajes"])))
            .unwrap();
        graph
            .add_unit(Arc::new(
                StaticUnit::new("service").consuming(&["table.mensajes", "registry.identifier"]),
            ))
            .unwrap();
        graph.add_dependency("service", "tables").unwrap();

        assert_eq!(
            graph.validate(),
            Err(DefinitionError::unresolved_input("service", "registry.identifier"))
        );
    }

    #[test]
    fn test_provisioning_gate_and_output_flow() {
        let mut graph = TopologyGraph::new("t");
        graph
            .add_unit(Arc::new(StaticUnit::new("tables").producing(&["table.mensajes"])))
            .unwrap();
        graph
            .add_unit(Arc::new(StaticUnit::new("service").consuming(&["table.mensajes"])))
            .unwrap();
        graph.add_dependency("service", "tables").unwrap();

        let err = graph.begin_provisioning("service").unwrap_err();
        assert!(matches!(
            err,
            StackflowError::Definition(DefinitionError::UnresolvedDependency { ref dependency, .. })
                if dependency == "tables"
        ));
        assert_eq!(graph.state("service"), Some(UnitState::Declared));

        graph.begin_provisioning("tables").unwrap();
        assert!(graph.outputs("tables").is_none());
        graph
            .complete_provisioning("tables", UnitOutputs::new().with("table.mensajes", "mensajes"))
            .unwrap();

        let inputs = graph.begin_provisioning("service").unwrap();
        assert_eq!(inputs.get("table.mensajes"), Some("mensajes"));
        assert_eq!(graph.state("service"), Some(UnitState::Provisioning));
    }

    #[test]
    fn test_missing_outputs_fail_the_unit() {
        let mut graph = TopologyGraph::new("t");
        graph
            .add_unit(Arc::new(StaticUnit::new("tables").producing(&["table.mensajes"])))
            .unwrap();
        graph.begin_provisioning("tables").unwrap();

        let err = graph.complete_provisioning("tables", UnitOutputs::new()).unwrap_err();
        assert!(matches!(err, StackflowError::Provisioning(_)));
        assert_eq!(graph.state("tables"), Some(UnitState::Failed));
    }

    #[test]
    fn test_destroy_waits_for_dependents() {
        let mut graph = graph_of(&["a", "b"], &[("b", "a")]);
        for name in ["a", "b"] {
            graph.begin_provisioning(name).unwrap();
            graph.complete_provisioning(name, UnitOutputs::new()).unwrap();
        }

        let err = graph.begin_destroying("a").unwrap_err();
        assert!(matches!(
            err,
            StackflowError::DependentsAlive { ref dependents, .. } if dependents == &["b"]
        ));

        graph.begin_destroying("b").unwrap();
        graph.complete_destroying("b").unwrap();
        graph.begin_destroying("a").unwrap();
        graph.complete_destroying("a").unwrap();
        assert_eq!(graph.state("a"), Some(UnitState::Destroyed));
    }
}
