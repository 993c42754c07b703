//! The release pipeline: `Source -> Build -> Deploy -> IntegrationTest`.

use super::{
    BuildRunner, CommandOutcome, ImagePublished, ImageReference, ImageResolver, PipelineConfig,
    PipelineRun, PipelineTrigger, TestRunner,
};
use crate::cancellation::CancellationToken;
use crate::compute::{ComputeService, DeploymentDescriptor, DESCRIPTOR_FILE};
use crate::core::{Artifact, ArtifactKind, FlowEvent, PipelineStage, RunStatus};
use crate::errors::{StackflowError, StageFailure};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::run_span;
use crate::pipeline::ArtifactStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Artifacts a stage body hands back, or why it failed.
type StageOutput = Result<Vec<(ArtifactKind, String, serde_json::Value)>, StageFailure>;

/// Drives release runs against one compute service.
///
/// Runs are independent of each other. The only shared state is the compute
/// service, which serializes deployments, so two runs may overlap in every
/// stage except Deploy.
pub struct ReleasePipeline {
    config: PipelineConfig,
    resolver: Arc<dyn ImageResolver>,
    builder: Arc<dyn BuildRunner>,
    tester: Arc<dyn TestRunner>,
    service: Arc<ComputeService>,
    events: Arc<dyn EventSink>,
    runs: DashMap<Uuid, PipelineRun>,
}

impl std::fmt::Debug for ReleasePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleasePipeline")
            .field("config", &self.config)
            .field("service", &self.service)
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

impl ReleasePipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        resolver: Arc<dyn ImageResolver>,
        builder: Arc<dyn BuildRunner>,
        tester: Arc<dyn TestRunner>,
        service: Arc<ComputeService>,
    ) -> Self {
        Self {
            config,
            resolver,
            builder,
            tester,
            service,
            events: Arc::new(NoOpEventSink),
            runs: DashMap::new(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The pipeline settings.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot of a run.
    #[must_use]
    pub fn run(&self, id: Uuid) -> Option<PipelineRun> {
        self.runs.get(&id).map(|r| r.value().clone())
    }

    /// Snapshots of every retained run, oldest first.
    ///
    /// Runs still in progress are always kept. Of the finished ones only the
    /// newest `run_history` are.
    #[must_use]
    pub fn runs(&self) -> Vec<PipelineRun> {
        let mut runs: Vec<PipelineRun> = self.runs.iter().map(|r| r.value().clone()).collect();
        runs.sort_by_key(|r| (r.created_at(), r.id()));
        runs
    }

    /// Starts a run for a registry push.
    ///
    /// Pushes to a repository the pipeline does not watch, or of a tag other
    /// than the tracked one, start nothing.
    pub async fn handle_publish(&self, push: ImagePublished) -> Option<PipelineRun> {
        let watched = push.repository == self.config.service_repository
            || push.repository == self.config.test_repository;
        if !watched || push.tag != self.config.source_tag {
            debug!(
                repository = %push.repository,
                tag = %push.tag,
                "Ignoring push outside the tracked source"
            );
            return None;
        }
        Some(self.trigger(PipelineTrigger::ImagePublished(push)).await)
    }

    /// Executes one run to completion.
    pub async fn trigger(&self, trigger: PipelineTrigger) -> PipelineRun {
        self.run_with_cancel(trigger, &CancellationToken::new()).await
    }

    /// Executes one run, observing `token`.
    ///
    /// The token is checked before every stage and interrupts Source, Build
    /// and IntegrationTest while they run. A deployment in progress is never
    /// interrupted; the run is cancelled after it instead, and traffic that
    /// already shifted stays shifted.
    pub async fn run_with_cancel(
        &self,
        trigger: PipelineTrigger,
        token: &CancellationToken,
    ) -> PipelineRun {
        let run = PipelineRun::new(trigger);
        let span = run_span(run.id(), &run.trigger().describe());
        self.execute(run, token).instrument(span).await
    }

    async fn execute(&self, mut run: PipelineRun, token: &CancellationToken) -> PipelineRun {
        let run_id = run.id();
        info!(trigger = %run.trigger().describe(), "Release run started");
        FlowEvent::run_started(run_id, &run.trigger().describe()).emit_to(self.events.as_ref());
        self.runs.insert(run_id, run.clone());

        for stage in PipelineStage::ORDER {
            if token.is_cancelled() {
                run.cancel(token.reason().unwrap_or_default());
                break;
            }
            if let Err(failure) = run.start_stage(stage) {
                self.fail(&mut run, failure);
                break;
            }
            FlowEvent::stage_started(run_id, stage).emit_to(self.events.as_ref());
            self.runs.insert(run_id, run.clone());

            let started = Instant::now();
            let limit = self.config.timeout_for(stage);
            let body = self.stage_body(stage, run.trigger(), run.artifacts());

            let outcome = if stage == PipelineStage::Deploy {
                Some(tokio::time::timeout(limit, body).await)
            } else {
                tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    result = tokio::time::timeout(limit, body) => Some(result),
                }
            };

            let artifacts = match outcome {
                None => {
                    run.cancel(token.reason().unwrap_or_default());
                    break;
                }
                Some(Err(_)) => Err(StageFailure::timed_out(stage, limit)),
                Some(Ok(result)) => result,
            };
            let stored = artifacts.and_then(|contents| {
                for (kind, name, content) in contents {
                    run.artifacts_mut().put(Artifact::new(run_id, kind, name, content))?;
                }
                Ok(())
            });
            if let Err(failure) = stored {
                self.fail(&mut run, failure);
                break;
            }

            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            run.succeed_stage(stage, duration_ms);
            info!(stage = %stage, duration_ms, "Stage succeeded");
            FlowEvent::stage_succeeded(run_id, stage, duration_ms).emit_to(self.events.as_ref());
            self.runs.insert(run_id, run.clone());
        }

        if run.status() == RunStatus::Cancelled {
            warn!(
                reason = ?run.cancel_reason(),
                stage = ?run.current_stage(),
                "Release run cancelled"
            );
        }
        info!(status = %run.status(), visited = ?run.visited(), "Release run finished");
        FlowEvent::run_finished(run_id, run.status())
            .add_data("visited", serde_json::json!(run.visited()))
            .emit_to(self.events.as_ref());
        self.runs.insert(run_id, run.clone());
        self.evict_finished();
        run
    }

    fn evict_finished(&self) {
        let mut finished: Vec<_> = self
            .runs
            .iter()
            .filter(|r| r.value().is_terminal())
            .map(|r| (r.value().created_at(), *r.key()))
            .collect();
        let Some(excess) = finished.len().checked_sub(self.config.run_history) else {
            return;
        };
        finished.sort_unstable();
        for (_, id) in finished.iter().take(excess) {
            self.runs.remove(id);
        }
        if excess > 0 {
            debug!(evicted = excess, kept = self.config.run_history, "Evicted finished runs");
        }
    }

    fn fail(&self, run: &mut PipelineRun, failure: StageFailure) {
        warn!(
            stage = %failure.stage,
            exit_code = ?failure.exit_code,
            error = %failure.reason,
            "Stage failed"
        );
        FlowEvent::stage_failed(run.id(), failure.stage, &failure.to_string())
            .emit_to(self.events.as_ref());
        run.fail_stage(failure);
    }

    async fn stage_body(
        &self,
        stage: PipelineStage,
        trigger: &PipelineTrigger,
        artifacts: &ArtifactStore,
    ) -> StageOutput {
        match stage {
            PipelineStage::Source => self.source(trigger).await,
            PipelineStage::Build => self.build(artifacts).await,
            PipelineStage::Deploy => self.deploy(artifacts).await,
            PipelineStage::IntegrationTest => self.integration_test(artifacts).await,
        }
    }

    async fn source(&self, trigger: &PipelineTrigger) -> StageOutput {
        let (service_tag, test_tag) = trigger.source_tags(&self.config.source_tag);
        let service = self
            .resolver
            .resolve(&self.config.service_repository, service_tag)
            .await?;
        let tests = self
            .resolver
            .resolve(&self.config.test_repository, test_tag)
            .await?;
        debug!(service = %service.uri, tests = %tests.uri, "Resolved source images");

        Ok(vec![
            (
                ArtifactKind::ServiceImage,
                "imageDetail.json".to_string(),
                service.image_detail(),
            ),
            (
                ArtifactKind::TestImage,
                "testImageDetail.json".to_string(),
                tests.image_detail(),
            ),
        ])
    }

    async fn build(&self, artifacts: &ArtifactStore) -> StageOutput {
        let image = image_input(artifacts, ArtifactKind::ServiceImage, PipelineStage::Build)?;
        let outcome = self
            .builder
            .build(&image)
            .await
            .map_err(|e| StageFailure::new(PipelineStage::Build, format!("{e:#}")))?;
        check_exit(PipelineStage::Build, &outcome)?;

        let content = outcome.files.get(DESCRIPTOR_FILE).ok_or_else(|| {
            StageFailure::new(
                PipelineStage::Build,
                format!("build did not produce {DESCRIPTOR_FILE}"),
            )
        })?;
        let descriptor = DeploymentDescriptor::parse(content)?;
        Ok(vec![(
            ArtifactKind::DeploymentDescriptor,
            DESCRIPTOR_FILE.to_string(),
            descriptor.to_json(),
        )])
    }

    async fn deploy(&self, artifacts: &ArtifactStore) -> StageOutput {
        let input =
            artifacts.require(ArtifactKind::DeploymentDescriptor, PipelineStage::Deploy)?;
        let descriptor: DeploymentDescriptor = serde_json::from_value(input.content().clone())
            .map_err(|e| {
                StageFailure::new(
                    PipelineStage::Deploy,
                    format!("unreadable {DESCRIPTOR_FILE}: {e}"),
                )
            })?;

        let receipt = self.service.deploy(&descriptor).await.map_err(|err| match err {
            StackflowError::Stage(failure) => failure,
            StackflowError::HealthGate(timeout) => timeout.into(),
            other => StageFailure::new(PipelineStage::Deploy, other.to_string()),
        })?;
        let content = serde_json::to_value(&receipt)
            .map_err(|e| StageFailure::new(PipelineStage::Deploy, e.to_string()))?;
        Ok(vec![(
            ArtifactKind::DeploymentReceipt,
            "deployment.json".to_string(),
            content,
        )])
    }

    async fn integration_test(&self, artifacts: &ArtifactStore) -> StageOutput {
        let image =
            image_input(artifacts, ArtifactKind::TestImage, PipelineStage::IntegrationTest)?;
        let service_url = self.service.endpoint();
        let outcome = self
            .tester
            .run(&image, service_url)
            .await
            .map_err(|e| StageFailure::new(PipelineStage::IntegrationTest, format!("{e:#}")))?;
        check_exit(PipelineStage::IntegrationTest, &outcome)?;

        Ok(vec![(
            ArtifactKind::TestReport,
            "test-report.json".to_string(),
            serde_json::json!({
                "service_url": service_url,
                "test_image": image.uri,
                "exit_code": outcome.exit_code,
            }),
        )])
    }
}

fn image_input(
    artifacts: &ArtifactStore,
    kind: ArtifactKind,
    consumer: PipelineStage,
) -> Result<ImageReference, StageFailure> {
    let artifact = artifacts.require(kind, consumer)?;
    ImageReference::from_image_detail(artifact.content())
        .ok_or_else(|| StageFailure::new(consumer, format!("{kind} is not an image detail")))
}

fn check_exit(stage: PipelineStage, outcome: &CommandOutcome) -> Result<(), StageFailure> {
    if outcome.succeeded() {
        return Ok(());
    }
    debug!(
        stage = %stage,
        exit_code = outcome.exit_code,
        output = %outcome.output,
        "Command failed"
    );
    Err(StageFailure::exited(stage, outcome.exit_code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use crate::errors::SourceResolutionError;
    use crate::pipeline::{MockImageResolver, RepositoryRole};
    use crate::testing::{
        fast_health, ScriptedBuildRunner, ScriptedHealthProbe, ScriptedTestRunner,
        StaticImageResolver,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn push() -> PipelineTrigger {
        PipelineTrigger::service_push("mensaje-service", "latest")
    }

    fn service() -> Arc<ComputeService> {
        let probe = Arc::new(ScriptedHealthProbe::healthy());
        Arc::new(
            ComputeService::new("MensajeService", "http://mensaje-lb", probe)
                .with_health(fast_health(Duration::from_millis(50))),
        )
    }

    fn pipeline(
        resolver: Arc<dyn ImageResolver>,
        tester: ScriptedTestRunner,
        config: PipelineConfig,
    ) -> ReleasePipeline {
        ReleasePipeline::new(
            config,
            resolver,
            Arc::new(ScriptedBuildRunner::succeeding()),
            Arc::new(tester),
            service(),
        )
    }

    #[tokio::test]
    async fn test_publish_outside_tracked_tag_is_ignored() {
        let resolver = Arc::new(StaticImageResolver::mensaje("latest"));
        let pipeline = pipeline(resolver, ScriptedTestRunner::passing(), PipelineConfig::default());

        let ignored = pipeline
            .handle_publish(ImagePublished::new(
                "mensaje-service",
                "feature-x",
                RepositoryRole::Service,
            ))
            .await;
        assert!(ignored.is_none());
        let ignored = pipeline
            .handle_publish(ImagePublished::new("other-repo", "latest", RepositoryRole::Service))
            .await;
        assert!(ignored.is_none());

        let run = pipeline
            .handle_publish(ImagePublished::new(
                "mensaje-service-tests",
                "latest",
                RepositoryRole::TestHarness,
            ))
            .await
            .unwrap();
        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(pipeline.runs().len(), 1);
    }

    #[tokio::test]
    async fn test_source_failure_stops_before_build() {
        let mut resolver = MockImageResolver::new();
        resolver
            .expect_resolve()
            .returning(|repo, tag| Err(SourceResolutionError::new(repo, tag, "tag not found")));
        let pipeline = pipeline(
            Arc::new(resolver),
            ScriptedTestRunner::passing(),
            PipelineConfig::default(),
        );

        let run = pipeline.trigger(push()).await;

        assert_eq!(run.status(), RunStatus::Failed);
        let failure = run.failure().unwrap();
        assert_eq!(failure.stage, PipelineStage::Source);
        assert!(failure.reason.contains("mensaje-service:latest"));
        assert_eq!(run.stage_status(PipelineStage::Build), StageStatus::Pending);
        assert!(run.artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_run() {
        let resolver = Arc::new(StaticImageResolver::mensaje("latest"));
        let config = PipelineConfig::default()
            .with_timeout(PipelineStage::IntegrationTest, Duration::from_millis(20));
        let pipeline = pipeline(
            resolver,
            ScriptedTestRunner::passing().with_delay(Duration::from_millis(200)),
            config,
        );

        let run = pipeline.trigger(push()).await;

        assert_eq!(run.status(), RunStatus::Failed);
        let failure = run.failure().unwrap();
        assert_eq!(failure.stage, PipelineStage::IntegrationTest);
        assert!(failure.reason.contains("time bound"));
        assert_eq!(pipeline.run(run.id()), Some(run));
    }

    #[tokio::test]
    async fn test_finished_runs_beyond_history_are_evicted() {
        let resolver = Arc::new(StaticImageResolver::mensaje("latest"));
        let config = PipelineConfig::default().with_run_history(2);
        let pipeline = pipeline(resolver, ScriptedTestRunner::passing(), config);

        let first = pipeline.trigger(push()).await;
        let second = pipeline.trigger(push()).await;
        let third = pipeline.trigger(push()).await;

        let kept: Vec<Uuid> = pipeline.runs().iter().map(PipelineRun::id).collect();
        assert_eq!(kept, vec![second.id(), third.id()]);
        assert!(pipeline.run(first.id()).is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_tests_interrupts_stage() {
        let resolver = Arc::new(StaticImageResolver::mensaje("latest"));
        let pipeline = Arc::new(pipeline(
            resolver,
            ScriptedTestRunner::passing().with_delay(Duration::from_millis(500)),
            PipelineConfig::default(),
        ));
        let token = Arc::new(CancellationToken::new());

        let handle = {
            let pipeline = Arc::clone(&pipeline);
            let token = Arc::clone(&token);
            tokio::spawn(async move { pipeline.run_with_cancel(push(), &token).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel("operator");
        let run = handle.await.unwrap();

        assert_eq!(run.status(), RunStatus::Cancelled);
        assert_eq!(run.cancel_reason(), Some("operator"));
        assert_eq!(run.stage_status(PipelineStage::Deploy), StageStatus::Succeeded);
        assert_eq!(run.stage_status(PipelineStage::IntegrationTest), StageStatus::Failed);
        assert!(run.failure().is_none());
    }
}
