//! Logging setup and tracing spans.
//!
//! Lifecycle events go to an [`EventSink`](crate::events::EventSink); this
//! module covers the `tracing` side: installing a subscriber and the spans
//! that give every log line its run or unit context.

mod tracing;

pub use self::tracing::{init_from_config, init_tracing, run_span, unit_span, LogFormat};
