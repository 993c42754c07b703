//! Write-once artifact store scoped to one run.

use crate::core::{Artifact, ArtifactKind, PipelineStage};
use crate::errors::StageFailure;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Artifacts produced by the stages of a single run.
///
/// Each kind is written at most once. A stage may only read artifacts that an
/// earlier stage of the same run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactStore {
    run_id: Uuid,
    artifacts: Vec<Artifact>,
}

impl ArtifactStore {
    /// Creates an empty store for `run_id`.
    #[must_use]
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            artifacts: Vec::new(),
        }
    }

    /// Stores an artifact.
    ///
    /// # Errors
    ///
    /// Fails if the artifact belongs to another run or its kind was already
    /// stored.
    pub fn put(&mut self, artifact: Artifact) -> Result<&Artifact, StageFailure> {
        if artifact.run_id() != self.run_id {
            return Err(StageFailure::new(
                artifact.stage(),
                format!("artifact '{}' belongs to run {}", artifact.name(), artifact.run_id()),
            ));
        }
        if self.get(artifact.kind()).is_some() {
            return Err(StageFailure::new(
                artifact.stage(),
                format!("{} already produced for this run", artifact.kind()),
            ));
        }

        tracing::debug!(
            run_id = %self.run_id,
            kind = %artifact.kind(),
            digest = %artifact.digest(),
            "Stored artifact"
        );
        self.artifacts.push(artifact);
        Ok(&self.artifacts[self.artifacts.len() - 1])
    }

    /// Gets an artifact by kind.
    #[must_use]
    pub fn get(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.kind() == kind)
    }

    /// Gets an input artifact for `consumer`.
    ///
    /// # Errors
    ///
    /// Fails if the artifact is missing, was produced by a stage that does not
    /// precede `consumer`, or no longer matches its digest.
    pub fn require(
        &self,
        kind: ArtifactKind,
        consumer: PipelineStage,
    ) -> Result<&Artifact, StageFailure> {
        if kind.producer().index() >= consumer.index() {
            return Err(StageFailure::new(
                consumer,
                format!("{kind} is not an input of the {consumer} stage"),
            ));
        }
        let artifact = self
            .get(kind)
            .ok_or_else(|| StageFailure::new(consumer, format!("missing input artifact {kind}")))?;
        if !artifact.verify() {
            return Err(StageFailure::new(
                consumer,
                format!("artifact {kind} does not match digest {}", artifact.digest()),
            ));
        }
        Ok(artifact)
    }

    /// All artifacts in production order.
    #[must_use]
    pub fn all(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// True if nothing was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_run_id;
    use serde_json::json;

    #[test]
    fn test_write_once_per_kind() {
        let run = generate_run_id();
        let mut store = ArtifactStore::new(run);

        store
            .put(Artifact::new(run, ArtifactKind::ServiceImage, "service", json!({"uri": "a"})))
            .unwrap();
        let err = store
            .put(Artifact::new(run, ArtifactKind::ServiceImage, "service", json!({"uri": "b"})))
            .unwrap_err();

        assert_eq!(err.stage, PipelineStage::Source);
        assert_eq!(store.get(ArtifactKind::ServiceImage).unwrap().content()["uri"], "a");
    }

    #[test]
    fn test_foreign_run_rejected() {
        let mut store = ArtifactStore::new(generate_run_id());
        let foreign = Artifact::new(generate_run_id(), ArtifactKind::TestImage, "tests", json!({}));
        assert!(store.put(foreign).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_require_only_earlier_stages() {
        let run = generate_run_id();
        let mut store = ArtifactStore::new(run);
        store
            .put(Artifact::new(
                run,
                ArtifactKind::DeploymentDescriptor,
                "imagedefinitions.json",
                json!([]),
            ))
            .unwrap();

        assert!(store
            .require(ArtifactKind::DeploymentDescriptor, PipelineStage::Deploy)
            .is_ok());
        assert!(store
            .require(ArtifactKind::DeploymentDescriptor, PipelineStage::Build)
            .is_err());
        assert!(store
            .require(ArtifactKind::ServiceImage, PipelineStage::Build)
            .is_err());
    }
}
