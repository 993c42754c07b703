//! The deployment descriptor (`imagedefinitions.json`) the service accepts.

use crate::errors::StageFailure;
use crate::core::PipelineStage;
use serde::{Deserialize, Serialize};

/// File name of the descriptor produced by the build stage.
pub const DESCRIPTOR_FILE: &str = "imagedefinitions.json";

/// One container-to-image binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    /// Container name in the task definition.
    pub name: String,
    /// Fully qualified image URI.
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

/// Which image each container of the service should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentDescriptor(Vec<ContainerImage>);

impl DeploymentDescriptor {
    /// A descriptor binding a single container.
    #[must_use]
    pub fn single(container: impl Into<String>, image_uri: impl Into<String>) -> Self {
        Self(vec![ContainerImage {
            name: container.into(),
            image_uri: image_uri.into(),
        }])
    }

    /// Parses the descriptor file content.
    ///
    /// # Errors
    ///
    /// Returns a build [`StageFailure`] if the content is not a non-empty
    /// list of container bindings.
    pub fn parse(content: &str) -> Result<Self, StageFailure> {
        let descriptor: Self = serde_json::from_str(content).map_err(|e| {
            StageFailure::new(PipelineStage::Build, format!("invalid {DESCRIPTOR_FILE}: {e}"))
        })?;
        if descriptor.0.is_empty() {
            return Err(StageFailure::new(
                PipelineStage::Build,
                format!("{DESCRIPTOR_FILE} lists no containers"),
            ));
        }
        Ok(descriptor)
    }

    /// The container bindings.
    #[must_use]
    pub fn containers(&self) -> &[ContainerImage] {
        &self.0
    }

    /// Image URI for a container.
    #[must_use]
    pub fn image_for(&self, container: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|c| c.name == container)
            .map(|c| c.image_uri.as_str())
    }

    /// The descriptor as JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let descriptor =
            DeploymentDescriptor::single("MensajeContainer", "repo/mensaje-service:abc");
        assert_eq!(
            serde_json::to_string(&descriptor).unwrap(),
            r#"[{"name":"MensajeContainer","imageUri":"repo/mensaje-service:abc"}]"#
        );
    }

    #[test]
    fn test_parse_rejects_empty_and_garbage() {
        assert!(DeploymentDescriptor::parse("[]").is_err());
        let err = DeploymentDescriptor::parse("{not json").unwrap_err();
        assert_eq!(err.stage, PipelineStage::Build);

        let parsed =
            DeploymentDescriptor::parse(r#"[{"name":"MensajeContainer","imageUri":"u"}]"#)
                .unwrap();
        assert_eq!(parsed.image_for("MensajeContainer"), Some("u"));
        assert!(parsed.image_for("Other").is_none());
    }
}
