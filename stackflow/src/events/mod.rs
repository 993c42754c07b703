//! Event sinks for topology and release observability.
//!
//! Sinks are passed explicitly to the orchestrator, the compute service and
//! the release pipeline; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
