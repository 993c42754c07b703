//! The release pipeline unit and the deployment target it resolves.

use super::keys;
use crate::core::PipelineStage;
use crate::errors::DefinitionError;
use crate::topology::{ResolvedInputs, ResourceDeclaration, ResourceUnit, TopologyGraph};
use serde::{Deserialize, Serialize};
use serde_json::json;

const READ_IMAGE_URI: &str = "export IMAGE_URI=$(cat imageDetail.json | jq -r \".ImageURI\")";
const WRITE_DESCRIPTOR: &str = concat!(
    "jq -n --arg name \"MensajeContainer\" --arg imageUri \"$IMAGE_URI\" ",
    "'[{\"name\":$name,\"imageUri\":$imageUri}]' > imagedefinitions.json"
);

/// Identifiers a release run needs, taken from provisioned units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    /// Service image repository.
    pub service_repository: String,
    /// Test-harness image repository.
    pub test_repository: String,
    /// Cluster running the service.
    pub cluster_name: String,
    /// Service name in the cluster.
    pub service_name: String,
    /// Public endpoint handed to the test harness as `SERVICE_URL`.
    pub endpoint: String,
}

impl DeploymentTarget {
    /// Reads the target from resolved inputs.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::UnresolvedInput`] for a missing key.
    pub fn from_inputs(inputs: &ResolvedInputs) -> Result<Self, DefinitionError> {
        Ok(Self {
            service_repository: inputs.require(keys::REGISTRY_IDENTIFIER)?.to_string(),
            test_repository: inputs.require(keys::REGISTRY_TEST_IDENTIFIER)?.to_string(),
            cluster_name: inputs.require(keys::SERVICE_CLUSTER_NAME)?.to_string(),
            service_name: inputs.require(keys::SERVICE_NAME)?.to_string(),
            endpoint: inputs.require(keys::SERVICE_ENDPOINT)?.to_string(),
        })
    }
}

/// Unit declaring the four-stage release pipeline.
#[derive(Debug, Clone)]
pub struct PipelineUnit {
    name: String,
    region: String,
    source_tag: String,
}

impl PipelineUnit {
    /// Creates the unit tracking the `latest` tag.
    #[must_use]
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            source_tag: "latest".to_string(),
        }
    }

    /// Resolves the deployment target from a provisioned topology.
    ///
    /// # Errors
    ///
    /// Fails if a dependency of this unit is not provisioned.
    pub fn target(&self, graph: &TopologyGraph) -> Result<DeploymentTarget, DefinitionError> {
        DeploymentTarget::from_inputs(&graph.resolve_inputs(&self.name)?)
    }
}

impl ResourceUnit for PipelineUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn produces(&self) -> Vec<String> {
        vec![keys::PIPELINE_NAME.to_string()]
    }

    fn consumes(&self) -> Vec<String> {
        [
            keys::NETWORK_VPC_ID,
            keys::REGISTRY_IDENTIFIER,
            keys::REGISTRY_TEST_IDENTIFIER,
            keys::SERVICE_CLUSTER_NAME,
            keys::SERVICE_NAME,
            keys::SERVICE_ENDPOINT,
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }

    fn declarations(
        &self,
        inputs: &ResolvedInputs,
    ) -> Result<Vec<ResourceDeclaration>, DefinitionError> {
        let target = DeploymentTarget::from_inputs(inputs)?;
        let vpc = inputs.require(keys::NETWORK_VPC_ID)?;

        let build = ResourceDeclaration::new("BuildProject", "AWS::CodeBuild::Project")
            .with_properties(json!({
                "BuildImage": "STANDARD_7_0",
                "Commands": [READ_IMAGE_URI, WRITE_DESCRIPTOR],
                "Artifacts": ["imagedefinitions.json"]
            }));
        let test_image = format!("{}:{}", target.test_repository, self.source_tag);
        let tests = ResourceDeclaration::new("IntegrationTestProject", "AWS::CodeBuild::Project")
            .with_properties(json!({
                "BuildImage": "STANDARD_7_0",
                "Privileged": true,
                "Commands": [
                    format!("docker pull {test_image}"),
                    format!("docker run --rm -e SERVICE_URL=$SERVICE_URL {test_image}")
                ],
                "Environment": { "SERVICE_URL": target.endpoint }
            }));

        let pipeline = ResourceDeclaration::new("MensajePipeline", "AWS::CodePipeline::Pipeline");
        let pipeline = pipeline.with_properties(json!({
            "Stages": [
                {
                    "Name": PipelineStage::Source.display_name(),
                    "Actions": [
                        {
                            "Name": "ECR_Source",
                            "Repository": target.service_repository,
                            "ImageTag": self.source_tag
                        },
                        {
                            "Name": "Test_Image_Source",
                            "Repository": target.test_repository,
                            "ImageTag": self.source_tag
                        }
                    ]
                },
                {
                    "Name": PipelineStage::Build.display_name(),
                    "Actions": [{ "Name": "Build", "Project": "BuildProject" }]
                },
                {
                    "Name": PipelineStage::Deploy.display_name(),
                    "Actions": [{
                        "Name": "DeployToECS",
                        "Cluster": target.cluster_name,
                        "Service": target.service_name,
                        "Vpc": vpc
                    }]
                },
                {
                    "Name": PipelineStage::IntegrationTest.display_name(),
                    "Actions": [{ "Name": "IntegrationTests", "Project": "IntegrationTestProject" }]
                }
            ]
        }));

        Ok(vec![build, tests, pipeline])
    }
}
