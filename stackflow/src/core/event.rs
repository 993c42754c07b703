//! Lifecycle events emitted by the orchestrator and release pipeline.

use super::{PipelineStage, RunStatus, UnitState};
use crate::events::EventSink;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event describing a unit or run transition.
///
/// Event types are dotted: `unit.*` for topology transitions, `run.*` and
/// `stage.*` for release runs, `deploy.*` for the compute service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    /// The event type (e.g., "stage.started").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl FlowEvent {
    /// Creates a new event with no data.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: crate::utils::iso_timestamp(),
            data: serde_json::Map::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Sends the event to a sink without blocking.
    pub fn emit_to(self, sink: &dyn EventSink) {
        sink.try_emit(&self.event_type, Some(serde_json::Value::Object(self.data)));
    }

    /// A unit moved to a new lifecycle state.
    #[must_use]
    pub fn unit_transition(unit: &str, from: UnitState, to: UnitState) -> Self {
        Self::new(format!("unit.{to}"))
            .add_data("unit", serde_json::json!(unit))
            .add_data("from", serde_json::json!(from))
    }

    /// A release run was created.
    #[must_use]
    pub fn run_started(run_id: Uuid, trigger: &str) -> Self {
        Self::new("run.started")
            .add_data("run_id", serde_json::json!(run_id))
            .add_data("trigger", serde_json::json!(trigger))
    }

    /// A release run reached a terminal status.
    #[must_use]
    pub fn run_finished(run_id: Uuid, status: RunStatus) -> Self {
        Self::new(format!("run.{status}"))
            .add_data("run_id", serde_json::json!(run_id))
    }

    /// A stage started.
    #[must_use]
    pub fn stage_started(run_id: Uuid, stage: PipelineStage) -> Self {
        Self::new("stage.started")
            .add_data("run_id", serde_json::json!(run_id))
            .add_data("stage", serde_json::json!(stage))
    }

    /// A stage succeeded.
    #[must_use]
    pub fn stage_succeeded(run_id: Uuid, stage: PipelineStage, duration_ms: f64) -> Self {
        Self::new("stage.succeeded")
            .add_data("run_id", serde_json::json!(run_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// A stage failed.
    #[must_use]
    pub fn stage_failed(run_id: Uuid, stage: PipelineStage, error: &str) -> Self {
        Self::new("stage.failed")
            .add_data("run_id", serde_json::json!(run_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("error", serde_json::json!(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;

    #[test]
    fn test_unit_transition_event() {
        let event = FlowEvent::unit_transition(
            "MensajeTableStack",
            UnitState::Provisioning,
            UnitState::Provisioned,
        );
        assert_eq!(event.event_type, "unit.provisioned");
        assert_eq!(event.data.get("unit"), Some(&serde_json::json!("MensajeTableStack")));
        assert_eq!(event.data.get("from"), Some(&serde_json::json!("provisioning")));
    }

    #[test]
    fn test_emit_to_sink() {
        let sink = CollectingEventSink::new();
        let run_id = Uuid::now_v7();
        FlowEvent::stage_started(run_id, PipelineStage::Build).emit_to(&sink);
        FlowEvent::run_finished(run_id, RunStatus::Failed).emit_to(&sink);

        let events = sink.events();
        assert_eq!(events[0].0, "stage.started");
        assert_eq!(events[1].0, "run.failed");
    }
}
