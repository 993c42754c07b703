//! Ports to the outside world used by release stages.
//!
//! Image lookups, build commands and the test harness all run outside this
//! crate. Their errors are opaque (`anyhow`); only the exit code of a command
//! carries meaning.

use crate::compute::{DeploymentDescriptor, DESCRIPTOR_FILE, DEFAULT_CONTAINER};
use crate::errors::SourceResolutionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A resolved image in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Repository name.
    pub repository: String,
    /// Tag that was resolved.
    pub tag: String,
    /// Fully qualified pull URI.
    pub uri: String,
    /// Registry digest of the manifest.
    pub digest: String,
}

impl ImageReference {
    /// The `imageDetail.json` document handed to the build.
    #[must_use]
    pub fn image_detail(&self) -> serde_json::Value {
        serde_json::json!({
            "ImageURI": self.uri,
            "ImageTags": [self.tag],
            "RepositoryName": self.repository,
            "ImageDigest": self.digest
        })
    }

    /// Reads a reference back from an `imageDetail.json` document.
    #[must_use]
    pub fn from_image_detail(detail: &serde_json::Value) -> Option<Self> {
        Some(Self {
            repository: detail["RepositoryName"].as_str()?.to_string(),
            tag: detail["ImageTags"].get(0)?.as_str()?.to_string(),
            uri: detail["ImageURI"].as_str()?.to_string(),
            digest: detail["ImageDigest"].as_str()?.to_string(),
        })
    }
}

/// Looks up image tags in the registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Resolves `repository:tag`.
    async fn resolve(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<ImageReference, SourceResolutionError>;
}

/// Result of a sandboxed command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Process exit code.
    pub exit_code: i32,
    /// Combined output, kept for diagnostics.
    #[serde(default)]
    pub output: String,
    /// Files the command declared as artifacts, by name.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl CommandOutcome {
    /// A zero exit with no files.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// A non-zero exit.
    #[must_use]
    pub fn exited(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            files: BTreeMap::new(),
        }
    }

    /// Adds an artifact file.
    #[must_use]
    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(name.into(), content.into());
        self
    }

    /// True on exit code zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the build command that turns an image detail into a deployment descriptor.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Runs the build against the service image. The outcome should carry
    /// `imagedefinitions.json` among its files.
    async fn build(&self, image: &ImageReference) -> anyhow::Result<CommandOutcome>;
}

/// Runs the integration-test harness against the live endpoint.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Runs `test_image` with `SERVICE_URL` set to `service_url`.
    async fn run(
        &self,
        test_image: &ImageReference,
        service_url: &str,
    ) -> anyhow::Result<CommandOutcome>;
}

/// In-process build that writes `imagedefinitions.json` for one container.
#[derive(Debug, Clone)]
pub struct DescriptorBuild {
    container: String,
}

impl Default for DescriptorBuild {
    fn default() -> Self {
        Self {
            container: DEFAULT_CONTAINER.to_string(),
        }
    }
}

impl DescriptorBuild {
    /// A build binding `container`.
    #[must_use]
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
        }
    }
}

#[async_trait]
impl BuildRunner for DescriptorBuild {
    async fn build(&self, image: &ImageReference) -> anyhow::Result<CommandOutcome> {
        let detail = image.image_detail();
        let Some(uri) = detail["ImageURI"].as_str() else {
            return Ok(CommandOutcome::exited(1, "imageDetail.json has no ImageURI"));
        };
        let descriptor = DeploymentDescriptor::single(&self.container, uri);
        let rendered = serde_json::to_string(&descriptor)?;
        Ok(CommandOutcome::success().with_file(DESCRIPTOR_FILE, rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageReference {
        ImageReference {
            repository: "mensaje-service".into(),
            tag: "latest".into(),
            uri: "123.dkr.ecr.us-east-1.amazonaws.com/mensaje-service:latest".into(),
            digest: "sha256:abc".into(),
        }
    }

    #[tokio::test]
    async fn test_descriptor_build_writes_imagedefinitions() {
        let outcome = DescriptorBuild::default().build(&image()).await.unwrap();

        assert!(outcome.succeeded());
        let content = &outcome.files[DESCRIPTOR_FILE];
        let expected = serde_json::json!([{
            "name": "MensajeContainer",
            "imageUri": "123.dkr.ecr.us-east-1.amazonaws.com/mensaje-service:latest",
        }]);
        assert_eq!(serde_json::from_str::<serde_json::Value>(content).unwrap(), expected);
        assert!(!content.contains(' '));
    }

    #[test]
    fn test_image_detail_reads_back() {
        let detail = image().image_detail();
        assert_eq!(ImageReference::from_image_detail(&detail), Some(image()));
        assert_eq!(ImageReference::from_image_detail(&serde_json::json!({"ImageURI": "x"})), None);
    }

    #[tokio::test]
    async fn test_mock_resolver() {
        let mut resolver = MockImageResolver::new();
        resolver
            .expect_resolve()
            .withf(|repo, tag| repo == "mensaje-service" && tag == "latest")
            .times(1)
            .returning(|_, _| Ok(image()));

        let resolved = resolver.resolve("mensaje-service", "latest").await.unwrap();
        assert_eq!(resolved.digest, "sha256:abc");
    }
}
