//! The record of one release run.

use super::{ArtifactStore, PipelineTrigger};
use crate::core::{PipelineStage, RunStatus, StageStatus};
use crate::errors::StageFailure;
use crate::utils::{generate_run_id, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status and timing of one stage in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage.
    pub stage: PipelineStage,
    /// Its status.
    pub status: StageStatus,
    /// When it started.
    pub started_at: Option<Timestamp>,
    /// When it reached a terminal status.
    pub finished_at: Option<Timestamp>,
    /// Execution time in milliseconds.
    pub duration_ms: Option<f64>,
}

impl StageRecord {
    fn pending(stage: PipelineStage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: None,
        }
    }
}

/// One execution of the release pipeline.
///
/// Stages run in the fixed order of [`PipelineStage::ORDER`]; a stage may only
/// start once its predecessor succeeded. The run ends `Succeeded`, `Failed`
/// or `Cancelled` and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    id: Uuid,
    trigger: PipelineTrigger,
    status: RunStatus,
    current_stage: Option<PipelineStage>,
    stages: Vec<StageRecord>,
    artifacts: ArtifactStore,
    failure: Option<StageFailure>,
    cancel_reason: Option<String>,
    created_at: Timestamp,
    finished_at: Option<Timestamp>,
}

impl PipelineRun {
    /// Creates a run with every stage pending.
    #[must_use]
    pub fn new(trigger: PipelineTrigger) -> Self {
        let id = generate_run_id();
        Self {
            id,
            trigger,
            status: RunStatus::Running,
            current_stage: None,
            stages: PipelineStage::ORDER.iter().copied().map(StageRecord::pending).collect(),
            artifacts: ArtifactStore::new(id),
            failure: None,
            cancel_reason: None,
            created_at: now_utc(),
            finished_at: None,
        }
    }

    /// Run id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// What started the run.
    #[must_use]
    pub fn trigger(&self) -> &PipelineTrigger {
        &self.trigger
    }

    /// Overall status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// The stage started last.
    #[must_use]
    pub fn current_stage(&self) -> Option<PipelineStage> {
        self.current_stage
    }

    /// Status of one stage.
    #[must_use]
    pub fn stage_status(&self, stage: PipelineStage) -> StageStatus {
        self.stages[stage.index()].status
    }

    /// Per-stage records in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    /// Stages that succeeded, in order.
    #[must_use]
    pub fn visited(&self) -> Vec<PipelineStage> {
        self.stages
            .iter()
            .filter(|r| r.status == StageStatus::Succeeded)
            .map(|r| r.stage)
            .collect()
    }

    /// Artifacts of the run.
    #[must_use]
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub(crate) fn artifacts_mut(&mut self) -> &mut ArtifactStore {
        &mut self.artifacts
    }

    /// The terminal failure, if the run failed.
    #[must_use]
    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    /// Why the run was cancelled.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Completion time.
    #[must_use]
    pub fn finished_at(&self) -> Option<Timestamp> {
        self.finished_at
    }

    /// True once the run can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Marks `stage` running.
    ///
    /// # Errors
    ///
    /// Fails if the run is over, the stage already ran, or its predecessor has
    /// not succeeded.
    pub fn start_stage(&mut self, stage: PipelineStage) -> Result<(), StageFailure> {
        if self.is_terminal() {
            return Err(StageFailure::new(stage, format!("run already {}", self.status)));
        }
        if self.stage_status(stage) != StageStatus::Pending {
            return Err(StageFailure::new(stage, "stage already started"));
        }
        if let Some(previous) = stage.predecessor() {
            if self.stage_status(previous) != StageStatus::Succeeded {
                return Err(StageFailure::new(
                    stage,
                    format!("predecessor {previous} has not succeeded"),
                ));
            }
        }

        let record = &mut self.stages[stage.index()];
        record.status = StageStatus::Running;
        record.started_at = Some(now_utc());
        self.current_stage = Some(stage);
        Ok(())
    }

    /// Marks the running `stage` succeeded; the last stage completes the run.
    pub fn succeed_stage(&mut self, stage: PipelineStage, duration_ms: f64) {
        let record = &mut self.stages[stage.index()];
        if record.status != StageStatus::Running {
            return;
        }
        record.status = StageStatus::Succeeded;
        record.finished_at = Some(now_utc());
        record.duration_ms = Some(duration_ms);

        if stage.next().is_none() {
            self.finish(RunStatus::Succeeded);
        }
    }

    /// Fails the run at `failure.stage`.
    pub fn fail_stage(&mut self, failure: StageFailure) {
        if self.is_terminal() {
            return;
        }
        let record = &mut self.stages[failure.stage.index()];
        record.status = StageStatus::Failed;
        record.finished_at = Some(now_utc());
        self.failure = Some(failure);
        self.finish(RunStatus::Failed);
    }

    /// Cancels the run. A stage interrupted mid-flight is recorded as failed.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        if let Some(record) = self.stages.iter_mut().find(|r| r.status == StageStatus::Running) {
            record.status = StageStatus::Failed;
            record.finished_at = Some(now_utc());
        }
        self.cancel_reason = Some(reason.into());
        self.finish(RunStatus::Cancelled);
    }

    fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(now_utc());
    }
}
