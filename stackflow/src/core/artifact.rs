//! Immutable, content-addressed stage artifacts.

use super::PipelineStage;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Resolved service image detail (`imageDetail.json`).
    ServiceImage,
    /// Resolved test-harness image detail.
    TestImage,
    /// Deployment descriptor (`imagedefinitions.json`).
    DeploymentDescriptor,
    /// Record of the instance set that went live.
    DeploymentReceipt,
    /// Integration test result bundle.
    TestReport,
}

impl ArtifactKind {
    /// The stage that is allowed to produce this kind.
    #[must_use]
    pub fn producer(self) -> PipelineStage {
        match self {
            Self::ServiceImage | Self::TestImage => PipelineStage::Source,
            Self::DeploymentDescriptor => PipelineStage::Build,
            Self::DeploymentReceipt => PipelineStage::Deploy,
            Self::TestReport => PipelineStage::IntegrationTest,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ServiceImage => "service_image",
            Self::TestImage => "test_image",
            Self::DeploymentDescriptor => "deployment_descriptor",
            Self::DeploymentReceipt => "deployment_receipt",
            Self::TestReport => "test_report",
        };
        f.write_str(s)
    }
}

/// A `sha256:<hex>` address of an artifact's canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Digests raw bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(format!("sha256:{}", hex::encode(Sha256::digest(bytes))))
    }

    /// Returns the digest string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An output of a pipeline stage.
///
/// Artifacts are owned by the producing stage of one run. Fields are private
/// so an artifact can never be changed after creation; a later run produces
/// a new artifact instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    run_id: Uuid,
    stage: PipelineStage,
    kind: ArtifactKind,
    name: String,
    digest: ContentDigest,
    content: serde_json::Value,
    created_at: Timestamp,
}

impl Artifact {
    /// Creates an artifact for `run_id`, addressing it by its content.
    ///
    /// The producing stage is derived from the kind.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        kind: ArtifactKind,
        name: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        let digest = Self::digest_of(&content);
        Self {
            run_id,
            stage: kind.producer(),
            kind,
            name: name.into(),
            digest,
            content,
            created_at: crate::utils::now_utc(),
        }
    }

    // serde_json maps are ordered, so equal values serialize identically.
    fn digest_of(content: &serde_json::Value) -> ContentDigest {
        ContentDigest::of(content.to_string().as_bytes())
    }

    /// The run that produced the artifact.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The producing stage.
    #[must_use]
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// The artifact kind.
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// The artifact file name (e.g. `imagedefinitions.json`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The content address.
    #[must_use]
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    /// The artifact content.
    #[must_use]
    pub fn content(&self) -> &serde_json::Value {
        &self.content
    }

    /// When the artifact was created.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns true if the content still matches the recorded digest.
    #[must_use]
    pub fn verify(&self) -> bool {
        Self::digest_of(&self.content) == self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artifact_is_content_addressed() {
        let run = Uuid::now_v7();
        let image = |run: Uuid, uri: &str| {
            let detail = json!({ "ImageURI": uri });
            Artifact::new(run, ArtifactKind::ServiceImage, "imageDetail.json", detail)
        };
        let a = image(run, "repo:1");
        let b = image(Uuid::now_v7(), "repo:1");
        let c = image(run, "repo:2");

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert!(a.digest().as_str().starts_with("sha256:"));
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn test_producer_stage_follows_kind() {
        let artifact = Artifact::new(
            Uuid::now_v7(),
            ArtifactKind::DeploymentDescriptor,
            "imagedefinitions.json",
            json!([]),
        );
        assert_eq!(artifact.stage(), PipelineStage::Build);
        assert_eq!(ArtifactKind::TestReport.producer(), PipelineStage::IntegrationTest);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let artifact = Artifact::new(Uuid::now_v7(), ArtifactKind::TestImage, "t", json!({"k": 1}));
        assert!(artifact.verify());

        let mut raw = serde_json::to_value(&artifact).unwrap();
        raw["content"] = json!({"k": 2});
        let tampered: Artifact = serde_json::from_value(raw).unwrap();
        assert!(!tampered.verify());
    }
}
