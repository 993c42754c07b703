//! Container image repositories for the service and its test harness.

use super::keys;
use crate::errors::DefinitionError;
use crate::topology::{ResolvedInputs, ResourceDeclaration, ResourceUnit};
use crate::utils::is_valid_repository;
use serde_json::json;

/// Service repository name.
pub const SERVICE_REPOSITORY: &str = "mensaje-service";
/// Test-harness repository name.
pub const TEST_REPOSITORY: &str = "mensaje-service-tests";

/// One image repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Logical id inside the unit.
    pub logical_id: String,
    /// Repository name.
    pub name: String,
    /// Scan images when pushed.
    pub scan_on_push: bool,
}

impl Repository {
    /// A scan-on-push repository.
    #[must_use]
    pub fn new(logical_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            name: name.into(),
            scan_on_push: true,
        }
    }

    fn declaration(&self) -> ResourceDeclaration {
        ResourceDeclaration::new(&self.logical_id, "AWS::ECR::Repository").with_properties(json!({
            "RepositoryName": self.name,
            "ImageScanningConfiguration": { "ScanOnPush": self.scan_on_push },
            "DeletionPolicy": "Delete"
        }))
    }
}

/// Leaf unit holding the service and test-harness repositories.
#[derive(Debug, Clone)]
pub struct ImageRegistry {
    name: String,
    region: String,
    service: Repository,
    tests: Repository,
}

impl ImageRegistry {
    /// Creates the registry with the given repositories.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidName`] for a malformed repository name.
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        service: Repository,
        tests: Repository,
    ) -> Result<Self, DefinitionError> {
        for repo in [&service, &tests] {
            if !is_valid_repository(&repo.name) {
                return Err(DefinitionError::InvalidName {
                    name: repo.name.clone(),
                    reason: "repository names are lowercase segments of [a-z0-9._-] \
                             separated by '/'"
                        .to_string(),
                });
            }
        }
        Ok(Self {
            name: name.into(),
            region: region.into(),
            service,
            tests,
        })
    }

    /// The `mensaje-service` and `mensaje-service-tests` repositories.
    #[must_use]
    pub fn mensaje(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            service: Repository::new("mensajeServiceRepository", SERVICE_REPOSITORY),
            tests: Repository::new("MensajeTestRepository", TEST_REPOSITORY),
        }
    }

    /// The service repository.
    #[must_use]
    pub fn service_repository(&self) -> &Repository {
        &self.service
    }

    /// The test-harness repository.
    #[must_use]
    pub fn test_repository(&self) -> &Repository {
        &self.tests
    }
}

impl ResourceUnit for ImageRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn produces(&self) -> Vec<String> {
        [
            keys::REGISTRY_IDENTIFIER,
            keys::REGISTRY_ARN,
            keys::REGISTRY_LATEST_TAG,
            keys::REGISTRY_TEST_IDENTIFIER,
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }

    fn declarations(
        &self,
        _inputs: &ResolvedInputs,
    ) -> Result<Vec<ResourceDeclaration>, DefinitionError> {
        Ok(vec![self.service.declaration(), self.tests.declaration()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mensaje_repositories_scan_on_push() {
        let registry = ImageRegistry::mensaje("MensajeEcrStack", "us-east-1");
        let decls = registry.declarations(&ResolvedInputs::new("MensajeEcrStack")).unwrap();

        assert_eq!(decls[0].properties["RepositoryName"], SERVICE_REPOSITORY);
        assert_eq!(decls[1].properties["RepositoryName"], TEST_REPOSITORY);
        assert!(decls
            .iter()
            .all(|d| d.properties["ImageScanningConfiguration"]["ScanOnPush"] == true));
        assert!(registry.produces().contains(&"registry.test_identifier".to_string()));
    }

    #[test]
    fn test_invalid_repository_rejected() {
        let err = ImageRegistry::new(
            "Registry",
            "us-east-1",
            Repository::new("Svc", "Mensaje Service"),
            Repository::new("Tests", TEST_REPOSITORY),
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidName { .. }));
    }
}
