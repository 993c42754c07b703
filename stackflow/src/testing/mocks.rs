//! Scripted fakes for units, the control plane and the release ports.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::compute::{HealthProbe, ServiceInstance};
use crate::core::ContentDigest;
use crate::errors::{DefinitionError, SourceResolutionError};
use crate::pipeline::{
    BuildRunner, CommandOutcome, DescriptorBuild, ImageReference, ImageResolver, TestRunner,
};
use crate::topology::{
    ProvisionRequest, ResolvedInputs, ResourceDeclaration, ResourceProvisioner, ResourceUnit,
    UnitOutputs,
};
use crate::units::{SERVICE_REPOSITORY, TEST_REPOSITORY};
use crate::utils::is_valid_image_tag;

/// Registry host used by [`StaticImageResolver`].
pub const TEST_REGISTRY_HOST: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com";

/// A unit with fixed produced and consumed keys.
///
/// Its declarations echo every consumed input, so tests can see which values
/// were threaded in.
#[derive(Debug, Clone)]
pub struct StaticUnit {
    name: String,
    region: String,
    produces: Vec<String>,
    consumes: Vec<String>,
}

impl StaticUnit {
    /// Creates a unit in `us-east-1` with no contract.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: "us-east-1".to_string(),
            produces: Vec::new(),
            consumes: Vec::new(),
        }
    }

    /// Sets the produced keys.
    #[must_use]
    pub fn producing(mut self, keys: &[&str]) -> Self {
        self.produces = keys.iter().map(ToString::to_string).collect();
        self
    }

    /// Sets the consumed keys.
    #[must_use]
    pub fn consuming(mut self, keys: &[&str]) -> Self {
        self.consumes = keys.iter().map(ToString::to_string).collect();
        self
    }
}

impl ResourceUnit for StaticUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn produces(&self) -> Vec<String> {
        self.produces.clone()
    }

    fn consumes(&self) -> Vec<String> {
        self.consumes.clone()
    }

    fn declarations(
        &self,
        inputs: &ResolvedInputs,
    ) -> Result<Vec<ResourceDeclaration>, DefinitionError> {
        self.consumes
            .iter()
            .enumerate()
            .map(|(i, key)| {
                let value = inputs.require(key)?;
                Ok(ResourceDeclaration::new(format!("Input{i}"), "Test::Input")
                    .with_properties(serde_json::json!({ "key": key, "value": value })))
            })
            .collect()
    }
}

/// A control plane that keeps units in memory.
///
/// Each expected output `key` of unit `u` gets the value `"{u}-{key}"` unless
/// overridden with [`Self::set_output`].
#[derive(Debug, Default)]
pub struct InMemoryProvisioner {
    failing: Mutex<HashSet<String>>,
    overrides: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    applied: Mutex<Vec<String>>,
    destroyed: Mutex<Vec<String>>,
    requests: Mutex<BTreeMap<String, ProvisionRequest>>,
}

impl InMemoryProvisioner {
    /// Creates a provisioner where every unit succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `apply` fail for `unit`.
    #[must_use]
    pub fn failing_on(self, unit: impl Into<String>) -> Self {
        self.failing.lock().insert(unit.into());
        self
    }

    /// Lets every unit succeed again.
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Overrides one output value.
    pub fn set_output(&self, unit: &str, key: &str, value: impl Into<String>) {
        self.overrides
            .lock()
            .entry(unit.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Units applied successfully, in call order.
    #[must_use]
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    /// Units destroyed, in call order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().clone()
    }

    /// The last request applied for `unit`.
    #[must_use]
    pub fn last_request(&self, unit: &str) -> Option<ProvisionRequest> {
        self.requests.lock().get(unit).cloned()
    }
}

#[async_trait]
impl ResourceProvisioner for InMemoryProvisioner {
    async fn apply(&self, request: &ProvisionRequest) -> anyhow::Result<UnitOutputs> {
        self.requests.lock().insert(request.unit.clone(), request.clone());
        if self.failing.lock().contains(&request.unit) {
            anyhow::bail!("control plane rejected {}", request.unit);
        }

        let overrides = self.overrides.lock().get(&request.unit).cloned().unwrap_or_default();
        let outputs = request
            .expected_outputs
            .iter()
            .map(|key| {
                let value = overrides
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| format!("{}-{key}", request.unit));
                (key.clone(), value)
            })
            .collect();
        self.applied.lock().push(request.unit.clone());
        Ok(outputs)
    }

    async fn destroy(&self, unit: &str, _region: &str) -> anyhow::Result<()> {
        self.destroyed.lock().push(unit.to_string());
        Ok(())
    }
}

/// Resolves a fixed set of `repository:tag` pairs.
#[derive(Debug, Default)]
pub struct StaticImageResolver {
    images: Mutex<BTreeMap<(String, String), ImageReference>>,
}

impl StaticImageResolver {
    /// Creates a resolver that knows no images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver knowing `tag` in both mensaje repositories.
    #[must_use]
    pub fn mensaje(tag: &str) -> Self {
        Self::new().with_image(SERVICE_REPOSITORY, tag).with_image(TEST_REPOSITORY, tag)
    }

    /// Adds an image.
    #[must_use]
    pub fn with_image(self, repository: &str, tag: &str) -> Self {
        self.publish(repository, tag);
        self
    }

    /// Adds an image to a shared resolver.
    pub fn publish(&self, repository: &str, tag: &str) {
        let reference = ImageReference {
            repository: repository.to_string(),
            tag: tag.to_string(),
            uri: Self::image_uri(repository, tag),
            digest: ContentDigest::of(format!("{repository}:{tag}").as_bytes()).to_string(),
        };
        self.images
            .lock()
            .insert((repository.to_string(), tag.to_string()), reference);
    }

    /// Pull URI of `repository:tag`.
    #[must_use]
    pub fn image_uri(repository: &str, tag: &str) -> String {
        format!("{TEST_REGISTRY_HOST}/{repository}:{tag}")
    }
}

#[async_trait]
impl ImageResolver for StaticImageResolver {
    async fn resolve(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<ImageReference, SourceResolutionError> {
        if !is_valid_image_tag(tag) {
            return Err(SourceResolutionError::new(repository, tag, "invalid tag"));
        }
        self.images
            .lock()
            .get(&(repository.to_string(), tag.to_string()))
            .cloned()
            .ok_or_else(|| {
                SourceResolutionError::new(repository, tag, "tag not found in repository")
            })
    }
}

/// A build that either succeeds like [`DescriptorBuild`] or exits non-zero.
#[derive(Debug)]
pub struct ScriptedBuildRunner {
    exit_code: i32,
    inner: DescriptorBuild,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBuildRunner {
    /// A build that writes the descriptor.
    #[must_use]
    pub fn succeeding() -> Self {
        Self {
            exit_code: 0,
            inner: DescriptorBuild::default(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A build that exits with `code`.
    #[must_use]
    pub fn exiting(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::succeeding()
        }
    }

    /// Image URIs built, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl BuildRunner for ScriptedBuildRunner {
    async fn build(&self, image: &ImageReference) -> anyhow::Result<CommandOutcome> {
        self.calls.lock().push(image.uri.clone());
        if self.exit_code != 0 {
            return Ok(CommandOutcome::exited(self.exit_code, "build failed"));
        }
        self.inner.build(image).await
    }
}

/// A test harness with a scripted exit code.
#[derive(Debug)]
pub struct ScriptedTestRunner {
    exit_code: i32,
    delay: Duration,
    service_urls: Mutex<Vec<String>>,
}

impl ScriptedTestRunner {
    /// A harness that exits 0.
    #[must_use]
    pub fn passing() -> Self {
        Self::exiting(0)
    }

    /// A harness that exits with `code`.
    #[must_use]
    pub fn exiting(code: i32) -> Self {
        Self {
            exit_code: code,
            delay: Duration::ZERO,
            service_urls: Mutex::new(Vec::new()),
        }
    }

    /// Makes every run take `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `SERVICE_URL` of every run, in call order.
    #[must_use]
    pub fn service_urls(&self) -> Vec<String> {
        self.service_urls.lock().clone()
    }
}

#[async_trait]
impl TestRunner for ScriptedTestRunner {
    async fn run(
        &self,
        _test_image: &ImageReference,
        service_url: &str,
    ) -> anyhow::Result<CommandOutcome> {
        self.service_urls.lock().push(service_url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(CommandOutcome::exited(self.exit_code, format!("tests against {service_url}")))
    }
}

/// A probe that answers from a script instead of the network.
#[derive(Debug, Default)]
pub struct ScriptedHealthProbe {
    delay: Duration,
    unhealthy_images: Mutex<HashSet<String>>,
    unhealthy_instances: Mutex<HashSet<String>>,
    checks: Mutex<usize>,
}

impl ScriptedHealthProbe {
    /// A probe where every instance is live.
    #[must_use]
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Makes every check take `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails every instance running `image_uri`.
    pub fn mark_image_unhealthy(&self, image_uri: &str) {
        self.unhealthy_images.lock().insert(image_uri.to_string());
    }

    /// Fails one instance.
    pub fn mark_instance_unhealthy(&self, instance_id: &str) {
        self.unhealthy_instances.lock().insert(instance_id.to_string());
    }

    /// Number of checks answered.
    #[must_use]
    pub fn checks(&self) -> usize {
        *self.checks.lock()
    }
}

#[async_trait]
impl HealthProbe for ScriptedHealthProbe {
    async fn check(&self, instance: &ServiceInstance, _path: &str) -> bool {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        *self.checks.lock() += 1;
        !self.unhealthy_images.lock().contains(&instance.image_uri)
            && !self.unhealthy_instances.lock().contains(&instance.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticImageResolver::mensaje("latest");

        let image = resolver.resolve(SERVICE_REPOSITORY, "latest").await.unwrap();
        assert_eq!(image.uri, StaticImageResolver::image_uri(SERVICE_REPOSITORY, "latest"));
        assert!(image.digest.starts_with("sha256:"));

        let err = resolver.resolve(SERVICE_REPOSITORY, "v9").await.unwrap_err();
        assert_eq!(err.tag, "v9");
        assert!(resolver.resolve(TEST_REPOSITORY, "bad tag").await.is_err());
    }

    #[tokio::test]
    async fn test_provisioner_outputs() {
        let provisioner = InMemoryProvisioner::new();
        let request = ProvisionRequest {
            unit: "tables".into(),
            region: "us-east-1".into(),
            declarations: Vec::new(),
            expected_outputs: vec!["table.mensajes".into()],
            graph_version: 1,
        };

        let outputs = provisioner.apply(&request).await.unwrap();
        assert_eq!(outputs.get("table.mensajes"), Some("tables-table.mensajes"));

        provisioner.set_output("tables", "table.mensajes", "mensajes");
        let outputs = provisioner.apply(&request).await.unwrap();
        assert_eq!(outputs.get("table.mensajes"), Some("mensajes"));
        assert_eq!(provisioner.applied(), vec!["tables", "tables"]);
    }

    #[tokio::test]
    async fn test_scripted_probe() {
        let probe = ScriptedHealthProbe::healthy();
        let instance = ServiceInstance {
            id: "svc-1".into(),
            image_uri: "img:v1".into(),
        };
        assert!(probe.check(&instance, "/ping").await);

        probe.mark_instance_unhealthy("svc-1");
        assert!(!probe.check(&instance, "/ping").await);
        assert_eq!(probe.checks(), 2);
    }
}
