//! The resource unit contract and the output/input maps threaded between units.

use crate::errors::DefinitionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Output values a provisioned unit exposes to its dependents.
///
/// Keys are namespaced by the producing concern, e.g. `table.mensajes` or
/// `service.endpoint`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitOutputs(BTreeMap<String, String>);

impl UnitOutputs {
    /// Creates an empty output map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an output, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts an output.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Gets an output value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates over outputs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UnitOutputs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// The outputs of a unit's (transitive) dependencies, as seen by that unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedInputs {
    unit: String,
    by_unit: BTreeMap<String, UnitOutputs>,
}

impl ResolvedInputs {
    /// Creates an empty input set for `unit`.
    #[must_use]
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            by_unit: BTreeMap::new(),
        }
    }

    /// Adds the outputs of one dependency.
    #[must_use]
    pub fn with_dependency(mut self, dependency: impl Into<String>, outputs: UnitOutputs) -> Self {
        self.by_unit.insert(dependency.into(), outputs);
        self
    }

    /// The unit these inputs belong to.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Looks up an input key across all dependencies.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.by_unit.values().find_map(|outputs| outputs.get(key))
    }

    /// Looks up an input key, failing if no dependency produced it.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::UnresolvedInput`] if the key is missing.
    pub fn require(&self, key: &str) -> Result<&str, DefinitionError> {
        self.get(key)
            .ok_or_else(|| DefinitionError::unresolved_input(&self.unit, key))
    }

    /// The outputs of a specific dependency.
    #[must_use]
    pub fn from_unit(&self, dependency: &str) -> Option<&UnitOutputs> {
        self.by_unit.get(dependency)
    }

    /// Names of the dependencies contributing inputs.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.by_unit.keys().map(String::as_str)
    }
}

/// One resource owned by a unit (a table, a repository, a load balancer...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    /// Logical id, unique within the unit.
    pub logical_id: String,
    /// Resource type, e.g. `AWS::DynamoDB::Table`.
    pub resource_type: String,
    /// Declarative properties.
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl ResourceDeclaration {
    /// Creates a declaration with no properties.
    #[must_use]
    pub fn new(logical_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            properties: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Sets the properties.
    #[must_use]
    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// A named, independently provisionable group of resources.
///
/// Units never reference each other directly. A unit names the output keys
/// it `produces()` and the keys it `consumes()`; the topology graph resolves
/// consumed keys from the outputs of provisioned dependencies and hands them
/// to [`ResourceUnit::declarations`].
pub trait ResourceUnit: Send + Sync + Debug {
    /// Returns the unit name (unique within a topology).
    fn name(&self) -> &str;

    /// Returns the target region.
    fn region(&self) -> &str;

    /// Output keys this unit exposes once provisioned.
    fn produces(&self) -> Vec<String>;

    /// Output keys this unit needs from its dependencies.
    fn consumes(&self) -> Vec<String> {
        Vec::new()
    }

    /// The ordered resource declarations, rendered against resolved inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if a consumed input is missing.
    fn declarations(
        &self,
        inputs: &ResolvedInputs,
    ) -> Result<Vec<ResourceDeclaration>, DefinitionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_outputs_builder() {
        let outputs = UnitOutputs::new()
            .with("table.mensajes", "mensajes")
            .with("table.timeline", "timeline");

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs.get("table.mensajes"), Some("mensajes"));
        assert!(outputs.get("table.seguidores").is_none());

        let keys: Vec<_> = outputs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["table.mensajes", "table.timeline"]);
    }

    #[test]
    fn test_resolved_inputs_require() {
        let inputs = ResolvedInputs::new("MensajeServiceStack").with_dependency(
            "MensajeTableStack",
            UnitOutputs::new().with("table.mensajes", "mensajes"),
        );

        assert_eq!(inputs.require("table.mensajes").unwrap(), "mensajes");
        let err = inputs.require("registry.identifier").unwrap_err();
        assert_eq!(
            err,
            DefinitionError::unresolved_input("MensajeServiceStack", "registry.identifier")
        );
        assert!(inputs.from_unit("MensajeTableStack").is_some());
    }
}
