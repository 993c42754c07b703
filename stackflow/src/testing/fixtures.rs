//! Ready-wired release setups for tests.

use std::sync::Arc;
use std::time::Duration;

use super::{ScriptedBuildRunner, ScriptedHealthProbe, ScriptedTestRunner, StaticImageResolver};
use crate::compute::{ComputeService, HealthCheckConfig};
use crate::events::CollectingEventSink;
use crate::pipeline::{PipelineConfig, ReleasePipeline};
use crate::utils::BackoffConfig;

/// A health gate that gives up after `timeout`, polling every 5ms.
#[must_use]
pub fn fast_health(timeout: Duration) -> HealthCheckConfig {
    HealthCheckConfig::default()
        .with_gate_timeout(timeout)
        .with_poll(BackoffConfig::constant(Duration::from_millis(5)))
}

/// A release pipeline over scripted ports, with every piece reachable.
pub struct ReleaseHarness {
    /// Resolver knowing `latest` in both mensaje repositories.
    pub resolver: Arc<StaticImageResolver>,
    /// The build.
    pub builder: Arc<ScriptedBuildRunner>,
    /// The test harness.
    pub tester: Arc<ScriptedTestRunner>,
    /// The liveness probe of the service.
    pub probe: Arc<ScriptedHealthProbe>,
    /// The compute service.
    pub service: Arc<ComputeService>,
    /// Events from the service and the pipeline.
    pub events: Arc<CollectingEventSink>,
    /// The pipeline.
    pub pipeline: Arc<ReleasePipeline>,
}

impl ReleaseHarness {
    /// A harness with a passing build, a passing test harness and a 50ms gate.
    #[must_use]
    pub fn new() -> Self {
        Self::with(
            ScriptedBuildRunner::succeeding(),
            ScriptedTestRunner::passing(),
            ScriptedHealthProbe::healthy(),
        )
    }

    /// A harness over the given fakes.
    #[must_use]
    pub fn with(
        builder: ScriptedBuildRunner,
        tester: ScriptedTestRunner,
        probe: ScriptedHealthProbe,
    ) -> Self {
        Self::with_config(builder, tester, probe, PipelineConfig::default())
    }

    /// A harness over the given fakes and settings.
    #[must_use]
    pub fn with_config(
        builder: ScriptedBuildRunner,
        tester: ScriptedTestRunner,
        probe: ScriptedHealthProbe,
        config: PipelineConfig,
    ) -> Self {
        let resolver = Arc::new(StaticImageResolver::mensaje(&config.source_tag));
        let builder = Arc::new(builder);
        let tester = Arc::new(tester);
        let probe = Arc::new(probe);
        let events = Arc::new(CollectingEventSink::new());
        let service = Arc::new(
            ComputeService::new("MensajeService", "http://mensaje-lb.test", probe.clone())
                .with_health(fast_health(Duration::from_millis(50)))
                .with_events(events.clone()),
        );
        let pipeline = Arc::new(
            ReleasePipeline::new(
                config,
                resolver.clone(),
                builder.clone(),
                tester.clone(),
                service.clone(),
            )
            .with_events(events.clone()),
        );

        Self {
            resolver,
            builder,
            tester,
            probe,
            service,
            events,
            pipeline,
        }
    }
}

impl Default for ReleaseHarness {
    fn default() -> Self {
        Self::new()
    }
}
